use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use spherecap::capture::{CameraBackend, SyntheticBackend};
use spherecap::config::{read_config, write_config, CameraBackendKind};
use spherecap::projection::RecordingMode;
use spherecap::recorder::events::PipelineEvent;
use spherecap::utils::error::ErrorResponse;
use spherecap::{PipelineConfig, PipelineError, RecordingCoordinator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    spherecap::init_tracing();

    let cli = Cli::parse();
    tracing::info!("Starting spherecap v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Commands::Record {
            config,
            seconds,
            mode,
            output,
            snapshot,
        } => run_record(&config, seconds, mode, output, snapshot).await,
        Commands::Devices { config } => run_devices(config.as_deref()).await,
        Commands::InitConfig { path } => write_config(&PipelineConfig::default(), &path)
            .with_context(|| format!("failed to write {}", path.display()))
            .map(|()| println!("Wrote default config to {}", path.display())),
    };

    if let Err(e) = &result {
        if let Some(response) = error_response(e) {
            eprintln!("error [{}]: {}", response.code, response.message);
        }
    }
    result
}

/// Pipeline error code behind an anyhow chain, if any
fn error_response(error: &anyhow::Error) -> Option<ErrorResponse> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<PipelineError>())
        .map(ErrorResponse::from)
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(path) => {
            read_config(path).with_context(|| format!("failed to load {}", path.display()))
        }
        None => Ok(PipelineConfig::default()),
    }
}

fn camera_backend(config: &PipelineConfig) -> anyhow::Result<Arc<dyn CameraBackend>> {
    match config.camera_backend {
        CameraBackendKind::Synthetic => {
            Ok(Arc::new(SyntheticBackend::new(config.synthetic.clone())))
        }
        #[cfg(feature = "native")]
        CameraBackendKind::Native => Ok(Arc::new(spherecap::capture::native::NativeBackend::new(
            config.audio_input.clone(),
        ))),
        #[cfg(not(feature = "native"))]
        CameraBackendKind::Native => {
            bail!("native cameras need spherecap built with `--features native`")
        }
    }
}

async fn run_record(
    config_path: &Path,
    seconds: f64,
    mode: Option<RecordingMode>,
    output: Option<PathBuf>,
    snapshot: Option<PathBuf>,
) -> anyhow::Result<()> {
    if !(seconds > 0.0 && seconds.is_finite()) {
        bail!("--seconds must be a positive number");
    }
    let config = load_config(Some(config_path))?;
    let backend = camera_backend(&config)?;

    let mut recording = config.recording.clone();
    if let Some(mode) = mode {
        recording.mode = mode;
    }
    if output.is_some() {
        recording.output_path = output;
    }

    let mut pipeline = RecordingCoordinator::new(config, backend);
    let mut events = pipeline.subscribe();
    let logger = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                PipelineEvent::FrameProcessed { .. } | PipelineEvent::ChunkRecorded { .. } => {
                    tracing::trace!("{}", event.name())
                }
                PipelineEvent::Error { cause, context }
                | PipelineEvent::StitchingError { cause, context }
                | PipelineEvent::RecordingError { cause, context } => {
                    tracing::warn!("{} in {}: {}", event.name(), context, cause)
                }
                _ => tracing::info!("{}", serde_json::to_string(&event).unwrap_or_default()),
            }
        }
    });

    pipeline
        .initialize()
        .await
        .context("failed to acquire cameras")?;
    let session = pipeline
        .start(recording)
        .await
        .context("failed to start recording")?;
    println!("Recording session {} for {}s (Ctrl-C stops early)", session.id, seconds);

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs_f64(seconds)) => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
    }

    let status = pipeline.status();
    let path = pipeline.stop().await.context("failed to finish recording")?;
    println!(
        "Saved {} ({} frames, {} dropped, {} stitch fallbacks)",
        path.display(),
        status.frame_count,
        status.dropped_frames,
        status.stitch_fallbacks
    );

    if let Some(snapshot) = snapshot {
        match pipeline.last_composed_frame() {
            Some(frame) => {
                frame
                    .write_png(&snapshot)
                    .with_context(|| format!("failed to write {}", snapshot.display()))?;
                println!("Last frame written to {}", snapshot.display());
            }
            None => tracing::warn!("No composed frame to snapshot"),
        }
    }

    pipeline.destroy().await;
    logger.abort();
    Ok(())
}

async fn run_devices(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let backend = camera_backend(&config)?;
    let devices = backend
        .enumerate()
        .await
        .with_context(|| format!("failed to list {} cameras", backend.name()))?;

    if devices.is_empty() {
        println!("No cameras found ({} backend)", backend.name());
    }
    for device in devices {
        println!(
            "{}\t{}{}",
            device.id,
            device.name,
            if device.has_audio { "\t(audio)" } else { "" }
        );
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-camera 360° capture and recording", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record for a fixed time using a pipeline config.
    Record {
        /// Pipeline config (JSON).
        #[arg(short, long)]
        config: PathBuf,
        /// How long to record.
        #[arg(short, long, default_value_t = 10.0)]
        seconds: f64,
        /// Override the configured recording mode, e.g. `panoramic-180`.
        #[arg(short, long, value_parser = parse_mode)]
        mode: Option<RecordingMode>,
        /// Artifact path instead of a timestamped name in the output directory.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Write the last composed frame as PNG.
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// List the cameras the configured backend can open.
    Devices {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Write a default pipeline config.
    InitConfig { path: PathBuf },
}

fn parse_mode(value: &str) -> Result<RecordingMode, String> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| format!("unknown recording mode `{value}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_found_through_context() {
        let error = anyhow::Error::new(PipelineError::NoCamera).context("failed to start recording");
        let response = error_response(&error).unwrap();
        assert_eq!(response.code, "NO_CAMERA");

        assert!(error_response(&anyhow::anyhow!("plain failure")).is_none());
    }

    #[test]
    fn test_mode_flag_parses_kebab_case() {
        assert_eq!(parse_mode("panoramic-180"), Ok(RecordingMode::Panoramic180));
        assert!(parse_mode("sideways").is_err());
    }
}
