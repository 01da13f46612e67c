//! Camera capture
//!
//! Device traits, the owned frame types that flow through the pipeline, and
//! the available backends.

pub mod frame;
pub mod synthetic;
pub mod traits;

#[cfg(feature = "native")]
pub mod native;

pub use frame::{CapturedFrame, PixelBuffer, PixelFormat};
pub use synthetic::{SyntheticBackend, SyntheticPattern, SyntheticSettings};
pub use traits::{
    AudioInput, Calibration, CameraBackend, CameraDevice, DeviceInfo, OpenRequest, Resolution,
    SourcePosition,
};
