//! Capture trait definitions
//!
//! Platform-agnostic traits for camera backends and the devices they open.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::frame::PixelBuffer;
use crate::utils::error::{AcquisitionError, CaptureError};

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Where a source points, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SourcePosition {
    pub azimuth: f64,
    pub elevation: f64,
}

impl SourcePosition {
    pub const fn new(azimuth: f64, elevation: f64) -> Self {
        Self { azimuth, elevation }
    }
}

/// Lens calibration.
///
/// Center and radius are normalized: `center_x`/`center_y` as a fraction of
/// width/height, `radius` as a fraction of the shorter side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Calibration {
    /// Field of view in degrees
    pub field_of_view: f64,
    pub center_x: f64,
    pub center_y: f64,
    pub radius: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            field_of_view: 180.0,
            center_x: 0.5,
            center_y: 0.5,
            radius: 0.5,
        }
    }
}

/// Information about a camera the backend can open
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Whether the device exposes a microphone
    pub has_audio: bool,

    /// Supported resolutions
    pub supported_resolutions: Vec<Resolution>,
}

/// An audio input FFmpeg can read, e.g. `alsa` / `default`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioInput {
    pub format: String,
    pub device: String,
}

/// Parameters for opening a device
#[derive(Debug, Clone, Copy)]
pub struct OpenRequest {
    pub resolution: Resolution,
    pub fps: u32,
    pub with_audio: bool,
}

/// A live camera handle.
///
/// `try_frame` must not block: it returns `Ok(None)` when the device has no
/// new data yet.
pub trait CameraDevice: Send {
    /// Device identifier
    fn id(&self) -> &str;

    /// Take the most recent frame, if any
    fn try_frame(&mut self) -> Result<Option<PixelBuffer>, CaptureError>;

    /// Audio input attached to this device
    fn audio_input(&self) -> Option<AudioInput>;

    /// Release the device
    fn close(&mut self);
}

/// Enumerates and opens camera devices
#[async_trait]
pub trait CameraBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// List available devices
    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, AcquisitionError>;

    /// Open one device
    async fn open(
        &self,
        device: &DeviceInfo,
        request: &OpenRequest,
    ) -> Result<Box<dyn CameraDevice>, AcquisitionError>;
}
