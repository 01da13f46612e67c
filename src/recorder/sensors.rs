//! Sensor overlay correlator
//!
//! Pins out-of-band sensor readings to the frame counter so they can later
//! be drawn over the matching frames. Readings that arrive while nothing is
//! recording are ignored.

use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;

use super::capture_loop::PipelineCounters;
use super::events::{EventBus, PipelineEvent, SensorKind, SensorOverlayEvent, SensorReading};
use super::state::PipelineState;

/// Cheap to clone; every clone feeds the same pipeline
#[derive(Clone)]
pub struct SensorCorrelator {
    state: Arc<RwLock<PipelineState>>,
    counters: Arc<PipelineCounters>,
    events: EventBus,
}

impl SensorCorrelator {
    pub fn new(
        state: Arc<RwLock<PipelineState>>,
        counters: Arc<PipelineCounters>,
        events: EventBus,
    ) -> Self {
        Self {
            state,
            counters,
            events,
        }
    }

    /// Returns `false` when not recording
    pub fn add_motion_event(&self, reading: impl Into<SensorReading>) -> bool {
        self.correlate(SensorKind::Motion, reading.into())
    }

    pub fn add_emf_reading(&self, reading: impl Into<SensorReading>) -> bool {
        self.correlate(SensorKind::Emf, reading.into())
    }

    pub fn add_audio_reading(&self, reading: impl Into<SensorReading>) -> bool {
        self.correlate(SensorKind::Audio, reading.into())
    }

    fn correlate(&self, kind: SensorKind, reading: SensorReading) -> bool {
        // hold the read lock so stop() cannot slip in between check and emit
        let state = self.state.read();
        if *state != PipelineState::Recording {
            return false;
        }

        let overlay = SensorOverlayEvent {
            kind,
            reading,
            frame_number: self.counters.frame_count(),
            timestamp: Utc::now(),
        };
        self.events.emit(match kind {
            SensorKind::Motion => PipelineEvent::MotionOverlay(overlay),
            SensorKind::Emf => PipelineEvent::EmfOverlay(overlay),
            SensorKind::Audio => PipelineEvent::AudioOverlay(overlay),
        });
        true
    }
}
