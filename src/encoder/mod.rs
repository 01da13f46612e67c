//! Recording encoders
//!
//! This module turns composed frames into encoded bytes:
//! - profile selection from `(format, quality)` with container fallback
//! - an FFmpeg-backed encoder and a built-in Y4M encoder
//! - the encoder stage thread that emits one chunk per second

pub mod ffmpeg;
pub mod stage;
pub mod types;
pub mod y4m;

pub use stage::{EncoderStage, FrameSink};
pub use types::{
    resolve_profile, Container, EncoderBackend, EncoderProfile, PlatformSupport, RecordingFormat,
    RecordingQuality,
};

use crate::capture::{AudioInput, PixelBuffer};
use crate::utils::error::EncoderError;

/// A frame-in, bytes-out encoder.
///
/// Bytes become available through [`drain`](FrameEncoder::drain) as the
/// encoder produces them; [`finish`](FrameEncoder::finish) flushes and
/// returns whatever is left.
pub trait FrameEncoder: Send {
    fn profile(&self) -> &EncoderProfile;

    fn write_frame(&mut self, frame: &PixelBuffer) -> Result<(), EncoderError>;

    /// Bytes produced since the last drain
    fn drain(&mut self) -> Vec<u8>;

    /// Flush and stop. Further calls return only undrained bytes.
    fn finish(&mut self) -> Result<Vec<u8>, EncoderError>;
}

/// Create the encoder a profile asks for
pub fn open_encoder(
    profile: EncoderProfile,
    width: u32,
    height: u32,
    fps: u32,
    audio: Option<&AudioInput>,
) -> Result<Box<dyn FrameEncoder>, EncoderError> {
    if profile.uses_ffmpeg() {
        Ok(Box::new(ffmpeg::FfmpegEncoder::spawn(
            profile, width, height, fps, audio,
        )?))
    } else {
        if audio.is_some() {
            tracing::warn!("Built-in Y4M container has no audio track; audio is dropped");
        }
        Ok(Box::new(y4m::Y4mEncoder::new(profile, width, height, fps)))
    }
}
