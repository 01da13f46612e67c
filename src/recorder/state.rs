//! Recording state management
//!
//! Defines the lifecycle state machine, the recording configuration and
//! session tracking.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::capture::Resolution;
use crate::encoder::types::{RecordingFormat, RecordingQuality};
use crate::projection::RecordingMode;
use crate::utils::error::{PipelineError, PipelineResult};

/// Largest accepted output surface
const MAX_RESOLUTION: Resolution = Resolution::new(7680, 4320);
const MAX_FRAME_RATE: u32 = 120;

/// Lifecycle of a pipeline instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    /// Nothing acquired yet
    Idle,
    /// Acquiring camera sources
    Initializing,
    /// Sources acquired, not recording
    Ready,
    /// Capture loop and encoder running
    Recording,
    /// Draining the encoder
    Stopping,
    /// Last session written to disk
    Finalized,
    /// Acquisition or finalization failed
    Error,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::Idle
    }
}

impl PipelineState {
    /// Whether `self -> next` is a legal edge
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle, Initializing)
                | (Initializing, Ready)
                | (Initializing, Error)
                | (Ready, Recording)
                | (Finalized, Recording)
                | (Recording, Stopping)
                | (Recording, Error)
                | (Stopping, Finalized)
                | (Stopping, Error)
                | (_, Idle)
        )
    }

    /// A RecordingSession exists exactly in these states
    pub fn has_session(self) -> bool {
        matches!(self, PipelineState::Recording | PipelineState::Stopping)
    }

    /// Apply a transition or fail with `InvalidState`
    pub fn transition(&mut self, next: PipelineState, operation: &'static str) -> PipelineResult<()> {
        if !self.can_transition_to(next) {
            return Err(PipelineError::InvalidState {
                operation,
                state: *self,
            });
        }
        tracing::debug!("Pipeline state {:?} -> {:?}", self, next);
        *self = next;
        Ok(())
    }
}

/// Configuration for one recording session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingConfiguration {
    /// Composition mode
    pub mode: RecordingMode,

    /// Output surface size
    pub resolution: Resolution,

    /// Capture ticks per second
    pub frame_rate: u32,

    /// Requested container
    pub format: RecordingFormat,

    /// Target bitrate class
    pub quality: RecordingQuality,

    /// Attach source 0's audio track
    pub audio_enabled: bool,

    /// Artifact path; a timestamped name is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
}

impl Default for RecordingConfiguration {
    fn default() -> Self {
        Self {
            mode: RecordingMode::Panoramic360,
            resolution: Resolution::new(1920, 960),
            frame_rate: 30,
            format: RecordingFormat::Mp4,
            quality: RecordingQuality::High,
            audio_enabled: true,
            output_path: None,
        }
    }
}

impl RecordingConfiguration {
    /// Check the values an encoder can accept
    pub fn validate(&self) -> PipelineResult<()> {
        let Resolution { width, height } = self.resolution;
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "resolution {width}x{height} is empty"
            )));
        }
        if width > MAX_RESOLUTION.width || height > MAX_RESOLUTION.height {
            return Err(PipelineError::InvalidConfig(format!(
                "resolution {width}x{height} exceeds {}x{}",
                MAX_RESOLUTION.width, MAX_RESOLUTION.height
            )));
        }
        // yuv420p needs even dimensions
        if width % 2 != 0 || height % 2 != 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "resolution {width}x{height} must have even dimensions"
            )));
        }
        if self.frame_rate == 0 || self.frame_rate > MAX_FRAME_RATE {
            return Err(PipelineError::InvalidConfig(format!(
                "frame rate {} outside 1..={MAX_FRAME_RATE}",
                self.frame_rate
            )));
        }
        Ok(())
    }

    /// First field other than `mode` that differs from `other`
    pub fn fixed_field_change(&self, other: &RecordingConfiguration) -> Option<&'static str> {
        if self.resolution != other.resolution {
            Some("resolution")
        } else if self.frame_rate != other.frame_rate {
            Some("frameRate")
        } else if self.format != other.format {
            Some("format")
        } else if self.quality != other.quality {
            Some("quality")
        } else if self.audio_enabled != other.audio_enabled {
            Some("audioEnabled")
        } else if self.output_path != other.output_path {
            Some("outputPath")
        } else {
            None
        }
    }
}

/// `360_recording_<ISO8601 with ':' and '.' replaced by '-'>.<ext>`
pub fn default_artifact_name(at: DateTime<Utc>, extension: &str) -> String {
    let stamp = at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("360_recording_{stamp}.{extension}")
}

/// An active recording
#[derive(Debug)]
pub struct RecordingSession {
    pub id: Uuid,
    pub config: Arc<RecordingConfiguration>,
    pub chunks: Vec<Vec<u8>>,
    pub started_at: DateTime<Utc>,
    pub started: Instant,
}

impl RecordingSession {
    pub fn new(config: Arc<RecordingConfiguration>) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            chunks: Vec::new(),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn duration_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    pub fn bytes(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            config: (*self.config).clone(),
            started_at: self.started_at,
            chunk_count: self.chunks.len(),
            bytes: self.bytes(),
        }
    }
}

/// Serializable view of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: Uuid,
    pub config: RecordingConfiguration,
    pub started_at: DateTime<Utc>,
    pub chunk_count: usize,
    pub bytes: usize,
}

/// Point-in-time pipeline status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    pub state: PipelineState,
    pub frame_count: u64,
    pub source_count: usize,
    pub recording_duration_ms: f64,
    pub chunks: usize,
    pub dropped_frames: u64,
    pub stitch_fallbacks: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_lifecycle_happy_path() {
        let mut state = PipelineState::Idle;
        for next in [
            PipelineState::Initializing,
            PipelineState::Ready,
            PipelineState::Recording,
            PipelineState::Stopping,
            PipelineState::Finalized,
            PipelineState::Recording,
        ] {
            state.transition(next, "test").unwrap();
        }
        assert!(state.has_session());
    }

    #[test]
    fn test_illegal_transitions_are_named_errors() {
        let mut state = PipelineState::Ready;
        let err = state.transition(PipelineState::Stopping, "stop").unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidState {
                operation: "stop",
                state: PipelineState::Ready
            }
        ));
        assert!(!PipelineState::Idle.can_transition_to(PipelineState::Recording));
        assert!(!PipelineState::Error.can_transition_to(PipelineState::Recording));
        assert!(PipelineState::Initializing.can_transition_to(PipelineState::Error));
        assert!(PipelineState::Recording.can_transition_to(PipelineState::Idle));
    }

    #[test]
    fn test_session_exists_only_while_recording_or_stopping() {
        assert!(!PipelineState::Ready.has_session());
        assert!(PipelineState::Stopping.has_session());
        assert!(!PipelineState::Finalized.has_session());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = RecordingConfiguration::default();
        assert!(config.validate().is_ok());

        config.resolution = Resolution::new(641, 480);
        assert!(config.validate().is_err());

        config.resolution = Resolution::new(640, 480);
        config.frame_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fixed_field_change_ignores_mode() {
        let a = RecordingConfiguration::default();
        let mut b = a.clone();
        b.mode = RecordingMode::MultiAngle;
        assert_eq!(a.fixed_field_change(&b), None);

        b.frame_rate = 10;
        assert_eq!(a.fixed_field_change(&b), Some("frameRate"));
    }

    #[test]
    fn test_default_artifact_name() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            default_artifact_name(at, "mp4"),
            "360_recording_2024-03-09T14-05-07-000Z.mp4"
        );
    }

    #[test]
    fn test_config_json_shape() {
        let json = r#"{
            "mode": "panoramic-180",
            "resolution": {"width": 1280, "height": 640},
            "frameRate": 24,
            "format": "webm",
            "quality": "ultra",
            "audioEnabled": false
        }"#;
        let config: RecordingConfiguration = serde_json::from_str(json).unwrap();
        assert_eq!(config.mode, RecordingMode::Panoramic180);
        assert_eq!(config.format, RecordingFormat::Webm);
        assert_eq!(config.quality, RecordingQuality::Ultra);
        assert!(config.output_path.is_none());
    }
}
