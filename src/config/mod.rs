//! Pipeline configuration

pub mod loader;
pub mod schema;

pub use loader::{read_config, write_config};
pub use schema::{CameraBackendKind, PipelineConfig};
