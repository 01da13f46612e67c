//! Camera topology
//!
//! Acquires the camera sources a topology needs and owns them for the
//! lifetime of the pipeline.

pub mod rotation;

pub use rotation::{RotationSequencer, RotationState, SharedRotation};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::capture::{
    AudioInput, Calibration, CameraBackend, CameraDevice, CapturedFrame, OpenRequest, Resolution,
    SourcePosition,
};
use crate::recorder::events::{EventBus, PipelineEvent};
use crate::utils::error::{AcquisitionError, CaptureError};

/// Most sources an array topology opens
pub const MAX_ARRAY_SOURCES: usize = 8;

/// Field of view of the rotating camera, degrees
pub const ROTATING_FOV: f64 = 90.0;

/// Capture rate bounds for the rotating camera
const ROTATING_MIN_FPS: u32 = 60;
const ROTATING_MAX_FPS: u32 = 120;

/// Physical camera arrangement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    #[default]
    SingleWideAngle,
    DualOpposing,
    Array { count: usize },
    SingleRotating,
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::SingleWideAngle => write!(f, "single-wide-angle"),
            Topology::DualOpposing => write!(f, "dual-opposing"),
            Topology::Array { count } => write!(f, "array-of-{}", count),
            Topology::SingleRotating => write!(f, "single-rotating"),
        }
    }
}

/// How one source of a topology is placed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceSlot {
    pub position: SourcePosition,
    /// Degrees
    pub field_of_view: f64,
    pub with_audio: bool,
}

impl Topology {
    /// Slots to fill, in index order
    pub fn slots(&self, calibration: &Calibration) -> Result<Vec<SourceSlot>, AcquisitionError> {
        let slot = |azimuth: f64, elevation: f64, field_of_view: f64, with_audio: bool| SourceSlot {
            position: SourcePosition::new(azimuth, elevation),
            field_of_view,
            with_audio,
        };

        let slots = match *self {
            Topology::SingleWideAngle => vec![slot(0.0, 0.0, calibration.field_of_view, true)],
            Topology::DualOpposing => vec![
                slot(0.0, 0.0, calibration.field_of_view, true),
                slot(180.0, 0.0, calibration.field_of_view, false),
            ],
            Topology::Array { count: 0 } => {
                return Err(AcquisitionError::InvalidTopology(
                    "array topology needs at least one camera".to_string(),
                ))
            }
            Topology::Array { count } => {
                let total = count.min(MAX_ARRAY_SOURCES);
                // more than four sources: the last one looks straight up
                let ring = if total > 4 { total - 1 } else { total };
                let fov = 360.0 / ring as f64;
                let mut slots: Vec<SourceSlot> = (0..ring)
                    .map(|i| slot(i as f64 * fov, 0.0, fov, i == 0))
                    .collect();
                if ring < total {
                    slots.push(slot(0.0, 90.0, calibration.field_of_view, false));
                }
                slots
            }
            Topology::SingleRotating => vec![slot(0.0, 0.0, ROTATING_FOV, true)],
        };
        Ok(slots)
    }

    /// Capture rate requested from each device
    pub fn capture_fps(&self, frame_rate: u32) -> u32 {
        match self {
            Topology::SingleRotating => frame_rate
                .saturating_mul(2)
                .clamp(ROTATING_MIN_FPS, ROTATING_MAX_FPS),
            _ => frame_rate,
        }
    }
}

/// An initialized camera
pub struct CameraSource {
    pub id: String,
    pub index: usize,
    pub position: SourcePosition,
    /// `field_of_view` holds this source's coverage
    pub calibration: Calibration,
    pub fps: u32,
    pub has_audio: bool,
    device: Box<dyn CameraDevice>,
    rotation: Option<SharedRotation>,
}

impl CameraSource {
    pub fn field_of_view(&self) -> f64 {
        self.calibration.field_of_view
    }

    pub fn rotation(&self) -> Option<&SharedRotation> {
        self.rotation.as_ref()
    }

    /// Position right now; a rotating source points where the sequencer left it
    pub fn current_position(&self) -> SourcePosition {
        match &self.rotation {
            Some(rotation) => SourcePosition::new(rotation.lock().current_angle, self.position.elevation),
            None => self.position,
        }
    }

    pub fn audio_input(&self) -> Option<AudioInput> {
        if self.has_audio {
            self.device.audio_input()
        } else {
            None
        }
    }

    /// Poll the device without blocking
    pub fn capture(&mut self) -> Result<Option<CapturedFrame>, CaptureError> {
        let Some(pixels) = self.device.try_frame()? else {
            return Ok(None);
        };
        Ok(Some(CapturedFrame {
            source_id: self.id.clone(),
            pixels,
            captured_at: Utc::now(),
            position: self.current_position(),
            calibration: self.calibration,
        }))
    }

    fn close(&mut self) {
        self.device.close();
    }
}

/// Parameters for acquiring a topology
#[derive(Debug, Clone, Copy)]
pub struct AcquisitionSettings {
    pub calibration: Calibration,
    pub resolution: Resolution,
    pub frame_rate: u32,
    pub rotation_speed: f64,
}

/// Owns the initialized sources
#[derive(Default)]
pub struct TopologyManager {
    topology: Option<Topology>,
    sources: Vec<CameraSource>,
    rotation: Option<SharedRotation>,
}

impl TopologyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire every source `topology` needs. On failure nothing stays open.
    pub async fn initialize(
        &mut self,
        topology: Topology,
        settings: &AcquisitionSettings,
        backend: &dyn CameraBackend,
        events: &EventBus,
    ) -> Result<(), AcquisitionError> {
        self.close_all();

        let slots = topology.slots(&settings.calibration)?;
        let devices = backend.enumerate().await?;
        if devices.len() < slots.len() {
            return Err(AcquisitionError::InsufficientDevices {
                topology: topology.to_string(),
                required: slots.len(),
                available: devices.len(),
            });
        }

        tracing::info!(
            "Initializing {} topology with {} source(s) via {} backend",
            topology,
            slots.len(),
            backend.name()
        );

        let fps = topology.capture_fps(settings.frame_rate);
        let rotation = (topology == Topology::SingleRotating)
            .then(|| Arc::new(Mutex::new(RotationState::new(settings.rotation_speed))));

        let mut sources = Vec::with_capacity(slots.len());
        for (index, (slot, info)) in slots.iter().zip(&devices).enumerate() {
            let request = OpenRequest {
                resolution: settings.resolution,
                fps,
                with_audio: slot.with_audio && info.has_audio,
            };
            let device = match backend.open(info, &request).await {
                Ok(device) => device,
                Err(e) => {
                    for mut source in sources {
                        CameraSource::close(&mut source);
                    }
                    return Err(e);
                }
            };

            let source = CameraSource {
                id: info.id.clone(),
                index,
                position: slot.position,
                calibration: Calibration {
                    field_of_view: slot.field_of_view,
                    ..settings.calibration
                },
                fps,
                has_audio: request.with_audio,
                device,
                rotation: rotation.clone(),
            };

            tracing::info!(
                "Camera {} online at azimuth {:.1}°, elevation {:.1}° (fov {:.1}°)",
                source.id,
                source.position.azimuth,
                source.position.elevation,
                source.field_of_view()
            );
            events.emit(PipelineEvent::CameraConnected {
                source_id: source.id.clone(),
                index,
                position: source.position,
            });
            sources.push(source);
        }

        self.topology = Some(topology);
        self.sources = sources;
        self.rotation = rotation;

        events.emit(PipelineEvent::RecorderInitialized {
            topology: topology.to_string(),
            source_count: self.sources.len(),
        });
        Ok(())
    }

    pub fn topology(&self) -> Option<Topology> {
        self.topology
    }

    pub fn sources(&self) -> &[CameraSource] {
        &self.sources
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn has_rotation(&self) -> bool {
        self.rotation.is_some()
    }

    /// Shared rotation state of the rotating topology
    pub fn rotation(&self) -> Option<SharedRotation> {
        self.rotation.clone()
    }

    /// Audio track of source 0, if it has one
    pub fn primary_audio(&self) -> Option<AudioInput> {
        self.sources.first().and_then(CameraSource::audio_input)
    }

    /// Poll every source once. Failures are returned alongside the frames.
    pub fn capture_all(&mut self) -> (Vec<CapturedFrame>, Vec<CaptureError>) {
        let mut frames = Vec::with_capacity(self.sources.len());
        let mut errors = Vec::new();
        for source in &mut self.sources {
            match source.capture() {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => {}
                Err(e) => errors.push(e),
            }
        }
        (frames, errors)
    }

    pub fn close_all(&mut self) {
        if self.sources.is_empty() {
            return;
        }
        for source in &mut self.sources {
            source.close();
        }
        tracing::info!("Closed {} camera source(s)", self.sources.len());
        self.sources.clear();
        self.rotation = None;
        self.topology = None;
    }
}

impl Drop for TopologyManager {
    fn drop(&mut self) {
        self.close_all();
    }
}
