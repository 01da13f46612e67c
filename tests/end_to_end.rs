use std::sync::Arc;
use std::time::Duration;

use spherecap::capture::{Resolution, SyntheticBackend, SyntheticSettings};
use spherecap::encoder::{EncoderBackend, PlatformSupport, RecordingFormat, RecordingQuality};
use spherecap::projection::RecordingMode;
use spherecap::recorder::events::drain_events;
use spherecap::recorder::{PipelineEvent, PipelineState, RecordingConfiguration};
use spherecap::topology::Topology;
use spherecap::{PipelineConfig, RecordingCoordinator};
use tempfile::tempdir;

fn rig(topology: Topology, devices: usize, output_dir: &std::path::Path) -> RecordingCoordinator {
    let backend = SyntheticBackend::new(SyntheticSettings {
        device_count: devices,
        width: 160,
        height: 120,
        ..SyntheticSettings::default()
    });
    let options = PipelineConfig {
        topology,
        encoder_backend: EncoderBackend::Auto,
        output_dir: output_dir.to_path_buf(),
        ..PipelineConfig::default()
    };
    RecordingCoordinator::new(options, Arc::new(backend)).with_platform(PlatformSupport::builtin_only())
}

#[tokio::test]
async fn test_three_second_standard_recording() {
    let dir = tempdir().unwrap();
    let mut pipeline = rig(Topology::SingleWideAngle, 1, dir.path());
    let mut rx = pipeline.subscribe();
    pipeline.initialize().await.unwrap();

    pipeline
        .start(RecordingConfiguration {
            mode: RecordingMode::Standard,
            resolution: Resolution::new(160, 80),
            frame_rate: 10,
            format: RecordingFormat::Mp4,
            quality: RecordingQuality::Medium,
            audio_enabled: true,
            output_path: None,
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    let frames = pipeline.status().frame_count;
    let path = pipeline.stop().await.unwrap();

    assert!((25..=35).contains(&frames), "unexpected frame count {frames}");
    assert_eq!(pipeline.state(), PipelineState::Finalized);

    let size = std::fs::metadata(&path).unwrap().len();
    assert!(size > 0);
    assert!(path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("360_recording_")));

    let events = drain_events(&mut rx);
    let saved: Vec<&PipelineEvent> = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::RecordingSaved { .. }))
        .collect();
    assert_eq!(saved.len(), 1);
    assert!(matches!(saved[0], PipelineEvent::RecordingSaved { size: s, .. } if *s == size));
    assert!(events.iter().any(|e| e.name() == "chunk-recorded"));

    pipeline.destroy().await;
}

#[tokio::test]
async fn test_array_rig_stitches_panorama() {
    let dir = tempdir().unwrap();
    let mut pipeline = rig(Topology::Array { count: 5 }, 5, dir.path());
    let mut rx = pipeline.subscribe();
    pipeline.initialize().await.unwrap();
    assert_eq!(pipeline.status().source_count, 5);

    pipeline
        .start(RecordingConfiguration {
            mode: RecordingMode::Panoramic360,
            resolution: Resolution::new(128, 64),
            frame_rate: 20,
            ..RecordingConfiguration::default()
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    pipeline.stop().await.unwrap();

    let events = drain_events(&mut rx);
    let connected = events.iter().filter(|e| e.name() == "camera-connected").count();
    assert_eq!(connected, 5);
    assert!(events.iter().any(|e| e.name() == "recording-saved"));
    let frame = pipeline.last_composed_frame().unwrap();
    assert_eq!((frame.width(), frame.height()), (128, 64));
}
