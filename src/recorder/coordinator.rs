//! Recording coordinator
//!
//! Owns the camera sources and drives the recording lifecycle: acquisition,
//! starting the capture loop and encoder stage, and finalizing the artifact.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

use super::capture_loop::{CaptureContext, CaptureLoop, PipelineCounters};
use super::events::{EventBus, PipelineEvent};
use super::sensors::SensorCorrelator;
use super::state::{
    default_artifact_name, PipelineState, PipelineStatus, RecordingConfiguration,
    RecordingSession, SessionSummary,
};
use crate::capture::{CameraBackend, PixelBuffer, Resolution};
use crate::config::PipelineConfig;
use crate::encoder::{self, EncoderBackend, EncoderProfile, EncoderStage, PlatformSupport};
use crate::projection::ProjectionEngine;
use crate::topology::{AcquisitionSettings, RotationSequencer, TopologyManager};
use crate::utils::error::{PipelineError, PipelineResult};

/// Tasks and threads alive while a session records
struct ActiveRecording {
    capture: CaptureLoop,
    encoder: EncoderStage,
    rotation: Option<RotationSequencer>,
}

/// Drives one camera rig through its recording sessions
pub struct RecordingCoordinator {
    /// Lifecycle state
    state: Arc<RwLock<PipelineState>>,

    /// Rig description, calibration and defaults
    options: PipelineConfig,

    /// Where devices come from
    backend: Arc<dyn CameraBackend>,

    /// Initialized camera sources
    sources: Arc<Mutex<TopologyManager>>,

    /// Active configuration; swapped whole by `reconfigure`
    config: Arc<RwLock<Arc<RecordingConfiguration>>>,

    /// Containers the encoder can produce, probed on first start
    platform: Option<PlatformSupport>,

    session: Option<RecordingSession>,
    active: Option<ActiveRecording>,
    counters: Arc<PipelineCounters>,
    events: EventBus,

    /// Composed frame the last session ended on
    last_frame: Option<PixelBuffer>,
}

impl RecordingCoordinator {
    pub fn new(options: PipelineConfig, backend: Arc<dyn CameraBackend>) -> Self {
        let config = Arc::new(options.recording.clone());
        Self {
            state: Arc::new(RwLock::new(PipelineState::Idle)),
            options,
            backend,
            sources: Arc::new(Mutex::new(TopologyManager::new())),
            config: Arc::new(RwLock::new(config)),
            platform: None,
            session: None,
            active: None,
            counters: Arc::new(PipelineCounters::default()),
            events: EventBus::new(),
            last_frame: None,
        }
    }

    /// Use a known encoder platform instead of probing for FFmpeg
    pub fn with_platform(mut self, platform: PlatformSupport) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn state(&self) -> PipelineState {
        *self.state.read()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Sensor input handle; usable from any thread
    pub fn sensors(&self) -> SensorCorrelator {
        SensorCorrelator::new(self.state.clone(), self.counters.clone(), self.events.clone())
    }

    /// The active recording configuration
    pub fn config(&self) -> Arc<RecordingConfiguration> {
        self.config.read().clone()
    }

    pub fn last_composed_frame(&self) -> Option<&PixelBuffer> {
        self.last_frame.as_ref()
    }

    /// Acquire the camera sources of the configured topology
    pub async fn initialize(&mut self) -> PipelineResult<()> {
        self.options.validate()?;
        self.state.write().transition(PipelineState::Initializing, "initialize")?;

        let settings = AcquisitionSettings {
            calibration: self.options.calibration,
            resolution: self.options.recording.resolution,
            frame_rate: self.options.recording.frame_rate,
            rotation_speed: self.options.rotation_speed_deg_per_sec,
        };
        let topology = self.options.topology;

        // acquisition awaits, so the manager is moved out of the lock meanwhile
        let mut manager = std::mem::take(&mut *self.sources.lock());
        let result = manager
            .initialize(topology, &settings, self.backend.as_ref(), &self.events)
            .await;
        *self.sources.lock() = manager;

        match result {
            Ok(()) => {
                self.state.write().transition(PipelineState::Ready, "initialize")?;
                tracing::info!("Pipeline ready ({} topology)", topology);
                Ok(())
            }
            Err(e) => {
                let e = PipelineError::from(e);
                tracing::error!("Camera acquisition failed: {}", e);
                self.events.error(&e, format!("initialize [{}]", e.code()));
                self.state.write().transition(PipelineState::Error, "initialize")?;
                Err(e)
            }
        }
    }

    async fn platform(&mut self) -> PlatformSupport {
        if let Some(platform) = &self.platform {
            return platform.clone();
        }
        let platform = match self.options.encoder_backend {
            EncoderBackend::Builtin => PlatformSupport::builtin_only(),
            EncoderBackend::Auto | EncoderBackend::Ffmpeg => {
                tokio::task::spawn_blocking(PlatformSupport::probe)
                    .await
                    .unwrap_or_else(|_| PlatformSupport::builtin_only())
            }
        };
        self.platform = Some(platform.clone());
        platform
    }

    /// Start a recording session
    pub async fn start(&mut self, config: RecordingConfiguration) -> PipelineResult<SessionSummary> {
        let state = self.state();
        if state.has_session() {
            return Err(PipelineError::AlreadyRecording);
        }
        let (source_count, audio) = {
            let sources = self.sources.lock();
            (sources.source_count(), sources.primary_audio())
        };
        if source_count == 0 {
            return Err(PipelineError::NoCamera);
        }
        if !state.can_transition_to(PipelineState::Recording) {
            return Err(PipelineError::InvalidState {
                operation: "start",
                state,
            });
        }
        config.validate()?;

        let platform = self.platform().await;
        let profile = encoder::resolve_profile(
            config.format,
            config.quality,
            self.options.encoder_backend,
            &platform,
        )?;
        if profile.fell_back {
            tracing::warn!(
                "{:?} is not available here, recording as {:?}",
                config.format,
                profile.container
            );
        }

        let audio = audio.filter(|_| config.audio_enabled);
        let Resolution { width, height } = config.resolution;
        let frame_encoder =
            encoder::open_encoder(profile, width, height, config.frame_rate, audio.as_ref())?;
        let stage = EncoderStage::spawn(frame_encoder, self.events.clone())?;

        let engine = ProjectionEngine::new(
            config.resolution,
            source_count,
            Some(self.options.stitcher.create()),
            self.events.clone(),
        );

        let config = Arc::new(config);
        *self.config.write() = config.clone();
        self.counters.reset();
        let session = RecordingSession::new(config.clone());
        let summary = session.summary();

        self.state.write().transition(PipelineState::Recording, "start")?;

        let capture = CaptureLoop::spawn(CaptureContext {
            sources: self.sources.clone(),
            engine,
            sink: stage.sink(),
            config: self.config.clone(),
            state: self.state.clone(),
            counters: self.counters.clone(),
            events: self.events.clone(),
        });
        let rotation = self
            .sources
            .lock()
            .rotation()
            .map(|state| RotationSequencer::start(state, self.events.clone()));

        self.active = Some(ActiveRecording {
            capture,
            encoder: stage,
            rotation,
        });

        tracing::info!(
            "Recording started: session {} ({:?}, {}x{} @ {} fps, {:?} at {} bps{})",
            session.id,
            config.mode,
            width,
            height,
            config.frame_rate,
            profile.container,
            profile.bitrate,
            if audio.is_some() { ", with audio" } else { "" }
        );
        self.events.emit(PipelineEvent::RecordingStarted {
            config: (*config).clone(),
            timestamp: session.started_at,
        });
        self.session = Some(session);

        Ok(summary)
    }

    /// Stop the session and write the artifact
    pub async fn stop(&mut self) -> PipelineResult<PathBuf> {
        if self.state() != PipelineState::Recording || self.session.is_none() {
            return Err(PipelineError::NotRecording);
        }
        self.state.write().transition(PipelineState::Stopping, "stop")?;
        tracing::info!("Stopping recording");

        match self.finish_session().await {
            Ok(path) => {
                self.state.write().transition(PipelineState::Finalized, "stop")?;
                Ok(path)
            }
            Err(e) => {
                tracing::error!("Failed to finalize recording: {}", e);
                self.events.recording_error(&e, format!("stop [{}]", e.code()));
                self.state.write().transition(PipelineState::Error, "stop")?;
                Err(e)
            }
        }
    }

    async fn finish_session(&mut self) -> PipelineResult<PathBuf> {
        let mut session = self.session.take().ok_or(PipelineError::NotRecording)?;
        let active = self.active.take().ok_or(PipelineError::NotRecording)?;

        if let Some(rotation) = active.rotation {
            rotation.stop().await;
        }
        if let Some(report) = active.capture.stop().await {
            tracing::debug!(
                "Projection stats: {} stitched, {} fallbacks, {} superseded",
                report.stats.stitched,
                report.stats.stitch_fallbacks,
                report.stats.stitch_superseded
            );
            self.last_frame = Some(report.last_frame);
        }

        let profile = *active.encoder.profile();
        session.chunks.extend(active.encoder.collect_chunks());
        session.chunks.extend(active.encoder.stop().await?);

        let frame_count = self.counters.frame_count();
        let duration_ms = session.duration_ms();
        let artifact: Vec<u8> = session.chunks.concat();

        let path = match &session.config.output_path {
            Some(path) => explicit_artifact_path(path, &profile),
            None => self
                .options
                .output_dir
                .join(default_artifact_name(Utc::now(), profile.container.extension())),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &artifact).await?;
        let size = artifact.len() as u64;

        tracing::info!(
            "Recording saved to {:?}: {} frames, {:.0}ms, {} bytes in {} chunk(s)",
            path,
            frame_count,
            duration_ms,
            size,
            session.chunks.len()
        );
        self.events.emit(PipelineEvent::RecordingStopped {
            frame_count,
            duration_ms,
        });
        self.events.emit(PipelineEvent::RecordingSaved {
            path: path.clone(),
            size,
        });
        Ok(path)
    }

    /// Swap the active configuration. While recording only `mode` may change.
    /// Returns the configuration it replaced.
    pub fn reconfigure(
        &mut self,
        config: RecordingConfiguration,
    ) -> PipelineResult<Arc<RecordingConfiguration>> {
        config.validate()?;

        let mut active = self.config.write();
        if self.state.read().has_session() {
            if let Some(field) = active.fixed_field_change(&config) {
                return Err(PipelineError::InvalidConfig(format!(
                    "{} cannot change while recording",
                    field
                )));
            }
        }

        tracing::info!("Reconfigured: mode {:?}", config.mode);
        Ok(std::mem::replace(&mut *active, Arc::new(config)))
    }

    pub fn status(&self) -> PipelineStatus {
        let chunks = match (&self.session, &self.active) {
            (Some(session), Some(active)) => session.chunks.len() + active.encoder.chunks_emitted(),
            _ => 0,
        };
        PipelineStatus {
            state: self.state(),
            frame_count: self.counters.frame_count(),
            source_count: self.sources.lock().source_count(),
            recording_duration_ms: self.session.as_ref().map_or(0.0, |s| s.duration_ms()),
            chunks,
            dropped_frames: self.counters.dropped_frames(),
            stitch_fallbacks: self.counters.stitch_fallbacks(),
        }
    }

    /// Stop any recording (best effort), release every source and return
    /// to idle
    pub async fn destroy(&mut self) {
        if self.state() == PipelineState::Recording {
            if let Err(e) = self.stop().await {
                tracing::warn!("Recording lost while shutting down: {}", e);
            }
        }
        self.sources.lock().close_all();
        self.session = None;
        self.active = None;
        // any state may return to idle
        let _ = self.state.write().transition(PipelineState::Idle, "destroy");
        tracing::info!("Pipeline destroyed");
    }
}

/// An explicit path is kept unless the container fell back and no longer
/// matches its extension
fn explicit_artifact_path(path: &Path, profile: &EncoderProfile) -> PathBuf {
    let extension = profile.container.extension();
    if !profile.fell_back || path.extension().and_then(|e| e.to_str()) == Some(extension) {
        return path.to_path_buf();
    }
    let swapped = path.with_extension(extension);
    tracing::warn!(
        "{:?} output cannot go to {:?}, writing {:?} instead",
        profile.container,
        path,
        swapped
    );
    swapped
}
