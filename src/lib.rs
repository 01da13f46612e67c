//! spherecap - multi-camera 360° capture, projection and recording.
//!
//! This is the library crate behind the `spherecap` CLI. It acquires the
//! cameras of a rig topology, composes one output frame per tick in the
//! selected projection mode, encodes the result into a single artifact and
//! correlates out-of-band sensor readings with frame numbers.

pub mod capture;
pub mod config;
pub mod encoder;
pub mod projection;
pub mod recorder;
pub mod topology;
pub mod utils;

pub use config::PipelineConfig;
pub use recorder::{PipelineEvent, RecordingCoordinator};
pub use utils::error::{PipelineError, PipelineResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spherecap=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
