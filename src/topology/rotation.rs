//! Rotation sequencer for the single-rotating topology

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::recorder::events::{EventBus, PipelineEvent};

/// Sequencer tick
pub const ROTATION_TICK: Duration = Duration::from_millis(100);

/// Default rotation speed in degrees per second
pub const DEFAULT_ROTATION_SPEED: f64 = 30.0;

/// Where a rotating camera points, shared between the sequencer and capture
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationState {
    /// Degrees in `[0, 360)`
    pub current_angle: f64,
    /// Degrees per second
    pub rotation_speed: f64,
}

impl RotationState {
    pub fn new(rotation_speed: f64) -> Self {
        Self {
            current_angle: 0.0,
            rotation_speed,
        }
    }

    /// Advance by `dt` seconds and return the new angle
    pub fn step(&mut self, dt: f64) -> f64 {
        self.current_angle = (self.current_angle + self.rotation_speed * dt).rem_euclid(360.0);
        self.current_angle
    }
}

impl Default for RotationState {
    fn default() -> Self {
        Self::new(DEFAULT_ROTATION_SPEED)
    }
}

pub type SharedRotation = Arc<Mutex<RotationState>>;

/// Running sequencer task
pub struct RotationSequencer {
    running: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<()>,
}

impl RotationSequencer {
    /// Start advancing `state` every [`ROTATION_TICK`], emitting
    /// `camera-rotated` on each step
    pub fn start(state: SharedRotation, events: EventBus) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ROTATION_TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // the first tick completes immediately
            ticker.tick().await;

            while flag.load(Ordering::SeqCst) {
                ticker.tick().await;
                if !flag.load(Ordering::SeqCst) {
                    break;
                }
                let angle = state.lock().step(ROTATION_TICK.as_secs_f64());
                events.emit(PipelineEvent::CameraRotated { angle });
            }
        });

        tracing::debug!("Rotation sequencer started");
        Self { running, handle }
    }

    pub async fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.handle.await;
        tracing::debug!("Rotation sequencer stopped");
    }
}
