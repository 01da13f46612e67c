//! Pipeline events
//!
//! Every lifecycle, per-frame and sensor notification goes out as one
//! [`PipelineEvent`] on a broadcast channel. Emitting never blocks and never
//! fails; events sent with no subscriber are dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;

use super::state::RecordingConfiguration;
use crate::capture::SourcePosition;

const EVENT_CAPACITY: usize = 1024;

/// Which sensor an overlay reading came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Motion,
    Emf,
    Audio,
}

/// An out-of-band sensor reading as submitted by a collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub payload: serde_json::Value,
    pub arrival: DateTime<Utc>,
}

impl SensorReading {
    /// A reading that arrived now
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            arrival: Utc::now(),
        }
    }
}

impl From<serde_json::Value> for SensorReading {
    fn from(payload: serde_json::Value) -> Self {
        Self::new(payload)
    }
}

/// A sensor reading pinned to the frame that was current when it arrived
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorOverlayEvent {
    pub kind: SensorKind,
    pub reading: SensorReading,
    pub frame_number: u64,
    pub timestamp: DateTime<Utc>,
}

/// Events observed by collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum PipelineEvent {
    RecorderInitialized {
        topology: String,
        source_count: usize,
    },
    CameraConnected {
        source_id: String,
        index: usize,
        position: SourcePosition,
    },
    CameraRotated {
        angle: f64,
    },
    FrameProcessed {
        frame_number: u64,
    },
    RecordingStarted {
        config: RecordingConfiguration,
        timestamp: DateTime<Utc>,
    },
    ChunkRecorded {
        size: usize,
    },
    RecordingStopped {
        frame_count: u64,
        duration_ms: f64,
    },
    RecordingSaved {
        path: PathBuf,
        size: u64,
    },
    MotionOverlay(SensorOverlayEvent),
    EmfOverlay(SensorOverlayEvent),
    AudioOverlay(SensorOverlayEvent),
    Error {
        cause: String,
        context: String,
    },
    StitchingError {
        cause: String,
        context: String,
    },
    RecordingError {
        cause: String,
        context: String,
    },
}

impl PipelineEvent {
    /// Event name as collaborators see it
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::RecorderInitialized { .. } => "recorder-initialized",
            PipelineEvent::CameraConnected { .. } => "camera-connected",
            PipelineEvent::CameraRotated { .. } => "camera-rotated",
            PipelineEvent::FrameProcessed { .. } => "frame-processed",
            PipelineEvent::RecordingStarted { .. } => "recording-started",
            PipelineEvent::ChunkRecorded { .. } => "chunk-recorded",
            PipelineEvent::RecordingStopped { .. } => "recording-stopped",
            PipelineEvent::RecordingSaved { .. } => "recording-saved",
            PipelineEvent::MotionOverlay(_) => "motion-overlay",
            PipelineEvent::EmfOverlay(_) => "emf-overlay",
            PipelineEvent::AudioOverlay(_) => "audio-overlay",
            PipelineEvent::Error { .. } => "error",
            PipelineEvent::StitchingError { .. } => "stitching-error",
            PipelineEvent::RecordingError { .. } => "recording-error",
        }
    }
}

/// Fan-out of pipeline events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: PipelineEvent) {
        tracing::trace!("event {}", event.name());
        let _ = self.tx.send(event);
    }

    pub fn error(&self, cause: impl ToString, context: impl Into<String>) {
        self.emit(PipelineEvent::Error {
            cause: cause.to_string(),
            context: context.into(),
        });
    }

    pub fn stitching_error(&self, cause: impl ToString, context: impl Into<String>) {
        self.emit(PipelineEvent::StitchingError {
            cause: cause.to_string(),
            context: context.into(),
        });
    }

    pub fn recording_error(&self, cause: impl ToString, context: impl Into<String>) {
        self.emit(PipelineEvent::RecordingError {
            cause: cause.to_string(),
            context: context.into(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Collect everything currently queued on a receiver
pub fn drain_events(rx: &mut broadcast::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                tracing::warn!("Event receiver lagged by {} events", n);
            }
            Err(_) => break,
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_uses_collaborator_names() {
        let json = serde_json::to_value(PipelineEvent::FrameProcessed { frame_number: 7 }).unwrap();
        assert_eq!(json["type"], "frame-processed");
        assert_eq!(json["frameNumber"], 7);

        let json = serde_json::to_value(PipelineEvent::StitchingError {
            cause: "boom".to_string(),
            context: "tick 3".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "stitching-error");
    }

    #[test]
    fn test_overlay_event_json() {
        let event = PipelineEvent::EmfOverlay(SensorOverlayEvent {
            kind: SensorKind::Emf,
            reading: SensorReading::new(serde_json::json!({"milligauss": 4.2})),
            frame_number: 12,
            timestamp: Utc::now(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "emf-overlay");
        assert_eq!(json["frameNumber"], 12);
        assert_eq!(json["reading"]["payload"]["milligauss"], 4.2);
        assert_eq!(event.name(), "emf-overlay");
    }

    #[test]
    fn test_bus_fans_out_in_order() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.emit(PipelineEvent::ChunkRecorded { size: 1 });
        bus.emit(PipelineEvent::ChunkRecorded { size: 2 });

        for rx in [&mut a, &mut b] {
            let sizes: Vec<usize> = drain_events(rx)
                .into_iter()
                .filter_map(|e| match e {
                    PipelineEvent::ChunkRecorded { size } => Some(size),
                    _ => None,
                })
                .collect();
            assert_eq!(sizes, vec![1, 2]);
        }
    }
}
