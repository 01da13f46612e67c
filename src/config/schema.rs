//! Pipeline configuration schema
//!
//! One JSON document describes the camera rig, the lens calibration, the
//! default recording settings and the encoder choice.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::capture::{AudioInput, Calibration, SyntheticSettings};
use crate::encoder::EncoderBackend;
use crate::projection::StitcherKind;
use crate::recorder::state::RecordingConfiguration;
use crate::topology::rotation::DEFAULT_ROTATION_SPEED;
use crate::topology::Topology;
use crate::utils::error::ConfigError;

// =============================================================================
// Camera Backend
// =============================================================================

/// Where camera frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackendKind {
    /// Generated test cards; needs no hardware
    #[default]
    Synthetic,
    /// Real cameras (requires the `native` feature)
    Native,
}

// =============================================================================
// Pipeline Config
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    pub version: String,
    pub topology: Topology,
    pub calibration: Calibration,
    /// Defaults for `start()`
    pub recording: RecordingConfiguration,
    pub stitcher: StitcherKind,
    pub encoder_backend: EncoderBackend,
    pub camera_backend: CameraBackendKind,
    /// FFmpeg audio input attached to the first native camera
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_input: Option<AudioInput>,
    pub rotation_speed_deg_per_sec: f64,
    /// Where timestamped artifacts are written
    pub output_dir: PathBuf,
    pub synthetic: SyntheticSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            topology: Topology::default(),
            calibration: Calibration::default(),
            recording: RecordingConfiguration::default(),
            stitcher: StitcherKind::default(),
            encoder_backend: EncoderBackend::default(),
            camera_backend: CameraBackendKind::default(),
            audio_input: None,
            rotation_speed_deg_per_sec: DEFAULT_ROTATION_SPEED,
            output_dir: PathBuf::from("recordings"),
            synthetic: SyntheticSettings::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.recording
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let cal = &self.calibration;
        if !(0.0..=1.0).contains(&cal.center_x) || !(0.0..=1.0).contains(&cal.center_y) {
            return Err(ConfigError::Invalid(format!(
                "calibration center ({}, {}) must be within 0..=1",
                cal.center_x, cal.center_y
            )));
        }
        if cal.radius <= 0.0 || !cal.radius.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "calibration radius {} must be positive",
                cal.radius
            )));
        }
        if cal.field_of_view == 0.0 || !(0.0..=360.0).contains(&cal.field_of_view) {
            return Err(ConfigError::Invalid(format!(
                "field of view {} must be within (0, 360]",
                cal.field_of_view
            )));
        }
        if !self.rotation_speed_deg_per_sec.is_finite() {
            return Err(ConfigError::Invalid(
                "rotation speed must be a finite number".to_string(),
            ));
        }
        if let Some(audio) = &self.audio_input {
            if audio.format.is_empty() || audio.device.is_empty() {
                return Err(ConfigError::Invalid(
                    "audio input needs a format and a device".to_string(),
                ));
            }
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("output directory is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::RecordingMode;

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"topology": "dual-opposing", "recording": {"mode": "stereo", "resolution": {"width": 640, "height": 320},
                "frameRate": 24, "format": "webm", "quality": "low", "audioEnabled": false}}"#,
        )
        .unwrap();
        assert_eq!(config.topology, Topology::DualOpposing);
        assert_eq!(config.recording.mode, RecordingMode::Stereo);
        assert_eq!(config.recording.frame_rate, 24);
        assert_eq!(config.stitcher, StitcherKind::FirstFrame);
        assert_eq!(config.rotation_speed_deg_per_sec, 30.0);
        assert_eq!(config.calibration, Calibration::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(PipelineConfig::default()).unwrap();
        assert_eq!(json["encoderBackend"], "auto");
        assert_eq!(json["cameraBackend"], "synthetic");
        assert_eq!(json["rotationSpeedDegPerSec"], 30.0);
        assert_eq!(json["topology"], "single-wide-angle");
        assert_eq!(json["recording"]["mode"], "panoramic-360");
    }

    #[test]
    fn test_native_audio_input() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"cameraBackend": "native", "audioInput": {"format": "alsa", "device": "hw:1"}}"#,
        )
        .unwrap();
        assert_eq!(config.camera_backend, CameraBackendKind::Native);
        assert_eq!(
            config.audio_input,
            Some(AudioInput {
                format: "alsa".to_string(),
                device: "hw:1".to_string(),
            })
        );
        assert!(config.validate().is_ok());

        let json = serde_json::to_value(PipelineConfig::default()).unwrap();
        assert!(json.get("audioInput").is_none());
    }

    #[test]
    fn test_validate_rejects_bad_calibration() {
        let mut config = PipelineConfig::default();
        config.calibration.radius = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = PipelineConfig::default();
        config.calibration.center_x = 1.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.recording.frame_rate = 0;
        assert!(config.validate().is_err());
    }
}
