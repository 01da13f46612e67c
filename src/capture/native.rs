//! Native camera backend using nokhwa
//!
//! Each opened camera gets its own capture thread (nokhwa's `Camera` is
//! created and dropped on that thread). The thread decodes to RGBA and
//! parks the newest frame in a slot that `try_frame` empties.

use async_trait::async_trait;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

use super::frame::PixelBuffer;
use super::traits::{AudioInput, CameraBackend, CameraDevice, DeviceInfo, OpenRequest, Resolution};
use crate::utils::error::{AcquisitionError, CaptureError};

/// Backend over the platform's native camera API
#[derive(Debug, Clone, Default)]
pub struct NativeBackend {
    /// FFmpeg audio input attached to the first camera, if any
    audio: Option<AudioInput>,
}

impl NativeBackend {
    pub fn new(audio: Option<AudioInput>) -> Self {
        Self { audio }
    }
}

fn map_nokhwa_error(context: &str, error: nokhwa::NokhwaError) -> AcquisitionError {
    let message = format!("{context}: {error}");
    if message.to_lowercase().contains("permission") {
        AcquisitionError::PermissionDenied(message)
    } else {
        AcquisitionError::DeviceUnavailable(message)
    }
}

fn parse_index(id: &str) -> CameraIndex {
    match id.parse::<u32>() {
        Ok(i) => CameraIndex::Index(i),
        Err(_) => CameraIndex::String(id.to_string()),
    }
}

#[async_trait]
impl CameraBackend for NativeBackend {
    fn name(&self) -> &str {
        "native"
    }

    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, AcquisitionError> {
        let cameras = nokhwa::query(ApiBackend::Auto)
            .map_err(|e| map_nokhwa_error("Failed to enumerate cameras", e))?;

        Ok(cameras
            .into_iter()
            .enumerate()
            .map(|(i, info)| {
                let id = match info.index() {
                    CameraIndex::Index(idx) => idx.to_string(),
                    CameraIndex::String(s) => s.to_string(),
                };
                DeviceInfo {
                    id,
                    name: info.human_name(),
                    has_audio: i == 0 && self.audio.is_some(),
                    supported_resolutions: vec![
                        Resolution::new(1920, 1080),
                        Resolution::new(1280, 720),
                        Resolution::new(640, 480),
                    ],
                }
            })
            .collect())
    }

    async fn open(
        &self,
        device: &DeviceInfo,
        request: &OpenRequest,
    ) -> Result<Box<dyn CameraDevice>, AcquisitionError> {
        let index = parse_index(&device.id);
        let latest: Arc<Mutex<Option<PixelBuffer>>> = Arc::new(Mutex::new(None));
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread_latest = latest.clone();
        let thread_running = running.clone();
        let device_id = device.id.clone();
        let handle = std::thread::Builder::new()
            .name(format!("camera-{}", device.id))
            .spawn(move || {
                let format =
                    RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
                let mut camera = match Camera::new(index, format) {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = ready_tx.send(Err(map_nokhwa_error("Failed to open camera", e)));
                        return;
                    }
                };
                if let Err(e) = camera.open_stream() {
                    let _ = ready_tx.send(Err(map_nokhwa_error("Failed to open stream", e)));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while thread_running.load(Ordering::SeqCst) {
                    // Blocks until the camera delivers; the camera controls timing
                    match camera.frame() {
                        Ok(buffer) => match buffer.decode_image::<RgbAFormat>() {
                            Ok(image) => {
                                let (w, h) = (image.width(), image.height());
                                if let Some(frame) = PixelBuffer::from_rgba(w, h, image.into_raw()) {
                                    *thread_latest.lock() = Some(frame);
                                }
                            }
                            Err(e) => tracing::debug!("Failed to decode frame on {}: {}", device_id, e),
                        },
                        Err(e) => tracing::debug!("Failed to capture frame on {}: {}", device_id, e),
                    }
                }

                if let Err(e) = camera.stop_stream() {
                    tracing::warn!("Error stopping camera stream {}: {}", device_id, e);
                }
            })
            .map_err(|e| AcquisitionError::DeviceUnavailable(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                return Err(AcquisitionError::DeviceUnavailable(format!(
                    "capture thread for {} exited during open",
                    device.id
                )))
            }
        }

        tracing::info!(
            "Native camera {} opened (requested {}x{} @ {}fps)",
            device.id,
            request.resolution.width,
            request.resolution.height,
            request.fps
        );

        Ok(Box::new(NativeCamera {
            id: device.id.clone(),
            latest,
            running,
            thread: Some(handle),
            audio: if request.with_audio && device.has_audio {
                self.audio.clone()
            } else {
                None
            },
        }))
    }
}

/// A camera owned by its capture thread
pub struct NativeCamera {
    id: String,
    latest: Arc<Mutex<Option<PixelBuffer>>>,
    running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
    audio: Option<AudioInput>,
}

impl CameraDevice for NativeCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn try_frame(&mut self) -> Result<Option<PixelBuffer>, CaptureError> {
        if self.thread.as_ref().map_or(true, |t| t.is_finished()) {
            return Err(CaptureError::new(&self.id, "capture thread stopped"));
        }
        Ok(self.latest.lock().take())
    }

    fn audio_input(&self) -> Option<AudioInput> {
        self.audio.clone()
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
            tracing::info!("Native camera {} closed", self.id);
        }
    }
}

impl Drop for NativeCamera {
    fn drop(&mut self) {
        self.close();
    }
}
