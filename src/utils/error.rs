//! Error types and handling
//!
//! Error taxonomy shared by every pipeline stage. Initialization and
//! start/stop misuse are returned to the caller as [`PipelineError`];
//! per-tick failures ([`CaptureError`], [`StitchingError`]) only ever
//! travel as events.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recorder::state::PipelineState;

/// Camera acquisition failures. Fatal to initialization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    #[error("Camera device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Camera permission denied: {0}")]
    PermissionDenied(String),

    #[error("Topology {topology} needs {required} camera(s), found {available}")]
    InsufficientDevices {
        topology: String,
        required: usize,
        available: usize,
    },

    #[error("Invalid topology: {0}")]
    InvalidTopology(String),
}

/// A single source failed to deliver a frame. Never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Capture failed on {source_id}: {message}")]
pub struct CaptureError {
    pub source_id: String,
    pub message: String,
}

impl CaptureError {
    pub fn new(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            message: message.into(),
        }
    }
}

/// Offloaded stitch failures. The tick falls back to standard composition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StitchingError {
    #[error("Stitcher failed: {0}")]
    Failed(String),

    #[error("Stitch worker is not running")]
    WorkerGone,
}

/// Encoder failures
#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("Container not supported on this platform: {0}")]
    Unsupported(String),

    #[error("Frame size mismatch: got {got} bytes, expected {expected}")]
    FrameSize { got: usize, expected: usize },

    #[error("Encoder stage stopped unexpectedly")]
    StageGone,
}

/// Configuration loading and validation failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors returned synchronously by pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error("A recording session is already active")]
    AlreadyRecording,

    #[error("No recording session is active")]
    NotRecording,

    #[error("No camera sources are initialized")]
    NoCamera,

    #[error("Encoder unsupported: {0}")]
    EncoderUnsupported(String),

    #[error("Cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: PipelineState,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Encoder error: {0}")]
    Encoder(EncoderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<EncoderError> for PipelineError {
    fn from(error: EncoderError) -> Self {
        match error {
            EncoderError::Unsupported(what) => PipelineError::EncoderUnsupported(what),
            other => PipelineError::Encoder(other),
        }
    }
}

impl From<ConfigError> for PipelineError {
    fn from(error: ConfigError) -> Self {
        PipelineError::InvalidConfig(error.to_string())
    }
}

impl PipelineError {
    /// Stable machine-readable code for events and the CLI
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Acquisition(_) => "ACQUISITION_ERROR",
            PipelineError::AlreadyRecording => "ALREADY_RECORDING",
            PipelineError::NotRecording => "NOT_RECORDING",
            PipelineError::NoCamera => "NO_CAMERA",
            PipelineError::EncoderUnsupported(_) => "ENCODER_UNSUPPORTED",
            PipelineError::InvalidState { .. } => "INVALID_STATE",
            PipelineError::InvalidConfig(_) => "INVALID_CONFIG",
            PipelineError::Encoder(_) => "ENCODER_ERROR",
            PipelineError::Io(_) => "IO_ERROR",
        }
    }
}

/// Error payload for collaborators that only see serialized data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&PipelineError> for ErrorResponse {
    fn from(error: &PipelineError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;
