//! Recording system module
//!
//! This module implements the recording pipeline around the camera sources:
//! - RecordingCoordinator to drive the lifecycle and sessions
//! - the capture loop that composes and submits one frame per tick
//! - sensor overlay correlation against the current frame number
//! - the event bus collaborators subscribe to

pub mod capture_loop;
pub mod coordinator;
pub mod events;
pub mod sensors;
pub mod state;

pub use coordinator::RecordingCoordinator;
pub use events::{EventBus, PipelineEvent, SensorKind, SensorOverlayEvent, SensorReading};
pub use sensors::SensorCorrelator;
pub use state::{PipelineState, PipelineStatus, RecordingConfiguration, SessionSummary};
