//! Synthetic camera backend
//!
//! Generates test-pattern frames in process. Used for headless runs, demos
//! and tests; it can also simulate warm-up delays, flaky devices and denied
//! permissions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::frame::{PixelBuffer, BLACK};
use super::traits::{AudioInput, CameraBackend, CameraDevice, DeviceInfo, OpenRequest, Resolution};
use crate::utils::error::{AcquisitionError, CaptureError};

/// Per-device base colours
const PALETTE: [[u8; 4]; 8] = [
    [220, 40, 40, 255],
    [40, 200, 60, 255],
    [40, 80, 220, 255],
    [230, 200, 30, 255],
    [200, 40, 200, 255],
    [30, 200, 210, 255],
    [240, 130, 30, 255],
    [150, 150, 150, 255],
];

/// Base colour of the synthetic device at `index`
pub fn palette_color(index: usize) -> [u8; 4] {
    PALETTE[index % PALETTE.len()]
}

/// What the synthetic devices draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyntheticPattern {
    /// Flat palette colour per device
    Solid,
    /// Circular fisheye disc, hue by angle, black outside the circle
    Fisheye,
}

/// Synthetic backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyntheticSettings {
    /// Number of devices to report
    pub device_count: usize,
    /// Native frame width
    pub width: u32,
    /// Native frame height
    pub height: u32,
    pub pattern: SyntheticPattern,
    /// Report a (silent) microphone on every device
    pub audio: bool,
    /// Simulate an OS-level camera permission denial
    pub deny_permission: bool,
    /// Calls to `try_frame` that return "not ready" after opening
    pub warmup_frames: u32,
    /// Fail every n-th `try_frame` call
    pub fail_every: Option<u64>,
}

impl Default for SyntheticSettings {
    fn default() -> Self {
        Self {
            device_count: 1,
            width: 640,
            height: 480,
            pattern: SyntheticPattern::Fisheye,
            audio: true,
            deny_permission: false,
            warmup_frames: 0,
            fail_every: None,
        }
    }
}

/// Backend producing synthetic cameras
#[derive(Debug, Clone, Default)]
pub struct SyntheticBackend {
    settings: SyntheticSettings,
}

impl SyntheticBackend {
    pub fn new(settings: SyntheticSettings) -> Self {
        Self { settings }
    }

    /// Backend with `count` solid-colour devices
    pub fn with_devices(count: usize) -> Self {
        Self::new(SyntheticSettings {
            device_count: count,
            pattern: SyntheticPattern::Solid,
            width: 64,
            height: 48,
            ..SyntheticSettings::default()
        })
    }
}

#[async_trait]
impl CameraBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, AcquisitionError> {
        if self.settings.deny_permission {
            return Err(AcquisitionError::PermissionDenied(
                "synthetic backend configured to deny access".to_string(),
            ));
        }

        Ok((0..self.settings.device_count)
            .map(|i| DeviceInfo {
                id: format!("synthetic-{i}"),
                name: format!("Synthetic Camera {i}"),
                has_audio: self.settings.audio,
                supported_resolutions: vec![Resolution::new(
                    self.settings.width,
                    self.settings.height,
                )],
            })
            .collect())
    }

    async fn open(
        &self,
        device: &DeviceInfo,
        request: &OpenRequest,
    ) -> Result<Box<dyn CameraDevice>, AcquisitionError> {
        let index = device
            .id
            .strip_prefix("synthetic-")
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|i| *i < self.settings.device_count)
            .ok_or_else(|| AcquisitionError::DeviceUnavailable(device.id.clone()))?;

        let frame = match self.settings.pattern {
            SyntheticPattern::Solid => {
                PixelBuffer::filled(self.settings.width, self.settings.height, palette_color(index))
            }
            SyntheticPattern::Fisheye => {
                fisheye_pattern(self.settings.width, self.settings.height, palette_color(index))
            }
        };

        tracing::debug!(
            "Opened synthetic camera {} ({}x{}, requested {} fps)",
            device.id,
            self.settings.width,
            self.settings.height,
            request.fps
        );

        Ok(Box::new(SyntheticCamera {
            id: device.id.clone(),
            frame,
            calls: 0,
            warmup_remaining: self.settings.warmup_frames,
            fail_every: self.settings.fail_every,
            audio: request.with_audio && self.settings.audio,
            open: true,
        }))
    }
}

/// A synthetic device serving a pre-rendered frame
pub struct SyntheticCamera {
    id: String,
    frame: PixelBuffer,
    calls: u64,
    warmup_remaining: u32,
    fail_every: Option<u64>,
    audio: bool,
    open: bool,
}

impl CameraDevice for SyntheticCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn try_frame(&mut self) -> Result<Option<PixelBuffer>, CaptureError> {
        if !self.open {
            return Err(CaptureError::new(&self.id, "device closed"));
        }
        self.calls += 1;

        if self.warmup_remaining > 0 {
            self.warmup_remaining -= 1;
            return Ok(None);
        }

        if let Some(n) = self.fail_every {
            if n > 0 && self.calls % n == 0 {
                return Err(CaptureError::new(&self.id, "simulated read failure"));
            }
        }

        Ok(Some(self.frame.clone()))
    }

    fn audio_input(&self) -> Option<AudioInput> {
        self.audio.then(|| AudioInput {
            format: "lavfi".to_string(),
            device: "anullsrc=r=48000:cl=stereo".to_string(),
        })
    }

    fn close(&mut self) {
        self.open = false;
    }
}

/// Circular fisheye test card: hue follows the angle around the centre,
/// brightness falls off toward the rim, tinted by the device colour.
fn fisheye_pattern(width: u32, height: u32, tint: [u8; 4]) -> PixelBuffer {
    let mut buf = PixelBuffer::filled(width, height, BLACK);
    let cx = width as f64 / 2.0;
    let cy = height as f64 / 2.0;
    let r = cx.min(cy);

    for y in 0..height {
        for x in 0..width {
            let dx = x as f64 + 0.5 - cx;
            let dy = y as f64 + 0.5 - cy;
            let dist = (dx * dx + dy * dy).sqrt();
            if dist > r {
                continue;
            }
            let angle = dy.atan2(dx).rem_euclid(std::f64::consts::TAU);
            let [hr, hg, hb] = hue_to_rgb(angle / std::f64::consts::TAU);
            let falloff = 1.0 - 0.5 * (dist / r);
            let mix = |h: f64, t: u8| ((h * 0.6 + t as f64 / 255.0 * 0.4) * falloff * 255.0) as u8;
            buf.set_pixel(x, y, [mix(hr, tint[0]), mix(hg, tint[1]), mix(hb, tint[2]), 255]);
        }
    }
    buf
}

/// Fully saturated hue in [0, 1) to RGB in [0, 1]
fn hue_to_rgb(h: f64) -> [f64; 3] {
    let h6 = (h.rem_euclid(1.0)) * 6.0;
    let x = 1.0 - (h6 % 2.0 - 1.0).abs();
    match h6 as u32 {
        0 => [1.0, x, 0.0],
        1 => [x, 1.0, 0.0],
        2 => [0.0, 1.0, x],
        3 => [0.0, x, 1.0],
        4 => [x, 0.0, 1.0],
        _ => [1.0, 0.0, x],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> OpenRequest {
        OpenRequest {
            resolution: Resolution::new(64, 48),
            fps: 30,
            with_audio: true,
        }
    }

    #[tokio::test]
    async fn test_enumerate_reports_device_count() {
        let backend = SyntheticBackend::with_devices(3);
        let devices = backend.enumerate().await.unwrap();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[2].id, "synthetic-2");
    }

    #[tokio::test]
    async fn test_denied_permission() {
        let backend = SyntheticBackend::new(SyntheticSettings {
            deny_permission: true,
            ..SyntheticSettings::default()
        });
        assert!(matches!(
            backend.enumerate().await,
            Err(AcquisitionError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_warmup_then_frames_then_failure() {
        let backend = SyntheticBackend::new(SyntheticSettings {
            device_count: 1,
            width: 8,
            height: 8,
            pattern: SyntheticPattern::Solid,
            warmup_frames: 1,
            fail_every: Some(3),
            ..SyntheticSettings::default()
        });
        let devices = backend.enumerate().await.unwrap();
        let mut cam = backend.open(&devices[0], &request()).await.unwrap();

        assert!(cam.try_frame().unwrap().is_none());
        let frame = cam.try_frame().unwrap().unwrap();
        assert_eq!(frame.pixel(0, 0), palette_color(0));
        assert!(cam.try_frame().is_err());

        cam.close();
        assert!(cam.try_frame().is_err());
    }

    #[tokio::test]
    async fn test_fisheye_pattern_is_black_outside_circle() {
        let backend = SyntheticBackend::new(SyntheticSettings {
            width: 40,
            height: 20,
            ..SyntheticSettings::default()
        });
        let devices = backend.enumerate().await.unwrap();
        let mut cam = backend.open(&devices[0], &request()).await.unwrap();
        let frame = cam.try_frame().unwrap().unwrap();
        assert_eq!(frame.pixel(0, 0), BLACK);
        assert_ne!(frame.pixel(20, 10), BLACK);
        assert!(cam.audio_input().is_some());
    }
}
