//! Frame capture loop
//!
//! One tick polls every source, composes the batch and hands a copy of the
//! composed frame to the encoder stage without waiting. The interval task
//! drives ticks at the session frame rate while the pipeline is recording.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use super::events::{EventBus, PipelineEvent};
use super::state::{PipelineState, RecordingConfiguration};
use crate::capture::PixelBuffer;
use crate::encoder::FrameSink;
use crate::projection::{Composition, ProjectionEngine, ProjectionStats, RecordingMode};
use crate::topology::TopologyManager;

/// Counters shared between the capture loop and observers
#[derive(Debug, Default)]
pub struct PipelineCounters {
    frames: AtomicU64,
    dropped_frames: AtomicU64,
    stitch_fallbacks: AtomicU64,
}

impl PipelineCounters {
    pub fn frame_count(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::SeqCst)
    }

    pub fn stitch_fallbacks(&self) -> u64 {
        self.stitch_fallbacks.load(Ordering::SeqCst)
    }

    /// Zero everything for a new session
    pub fn reset(&self) {
        self.frames.store(0, Ordering::SeqCst);
        self.dropped_frames.store(0, Ordering::SeqCst);
        self.stitch_fallbacks.store(0, Ordering::SeqCst);
    }
}

/// What one tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub frame_number: u64,
    pub captured: usize,
    pub composition: Composition,
    /// `false` when the encoder queue was full and the frame was dropped
    pub submitted: bool,
}

/// Run one capture tick
pub fn tick(
    sources: &mut TopologyManager,
    engine: &mut ProjectionEngine,
    mode: RecordingMode,
    sink: Option<&FrameSink>,
    counters: &PipelineCounters,
    events: &EventBus,
) -> TickOutcome {
    let (frames, errors) = sources.capture_all();
    for error in errors {
        tracing::warn!("{}", error);
        events.error(&error, format!("capture {}", error.source_id));
    }

    let frame_number = counters.frames.fetch_add(1, Ordering::SeqCst) + 1;
    let composition = engine.compose(&frames, mode);
    counters
        .stitch_fallbacks
        .store(engine.stats().stitch_fallbacks, Ordering::SeqCst);

    let submitted = match sink {
        Some(sink) => sink.try_submit(engine.surface().clone()),
        None => false,
    };
    if sink.is_some() && !submitted {
        let dropped = counters.dropped_frames.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!("Encoder busy, dropped frame {} ({} total)", frame_number, dropped);
    }

    if frame_number % 300 == 0 {
        tracing::debug!(
            "Processed {} frames ({} source frame(s) this tick, {:?})",
            frame_number,
            frames.len(),
            composition
        );
    }

    events.emit(PipelineEvent::FrameProcessed { frame_number });
    TickOutcome {
        frame_number,
        captured: frames.len(),
        composition,
        submitted,
    }
}

/// Everything the loop task needs
pub struct CaptureContext {
    pub sources: Arc<Mutex<TopologyManager>>,
    pub engine: ProjectionEngine,
    pub sink: FrameSink,
    pub config: Arc<RwLock<Arc<RecordingConfiguration>>>,
    pub state: Arc<RwLock<PipelineState>>,
    pub counters: Arc<PipelineCounters>,
    pub events: EventBus,
}

/// Returned when the loop exits
pub struct LoopReport {
    pub last_frame: PixelBuffer,
    pub stats: ProjectionStats,
}

/// Running capture loop task
pub struct CaptureLoop {
    running: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<LoopReport>,
}

impl CaptureLoop {
    pub fn spawn(context: CaptureContext) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = tokio::spawn(run(context, flag));
        Self { running, handle }
    }

    /// Stop ticking and shut down the stitch worker
    pub async fn stop(self) -> Option<LoopReport> {
        self.running.store(false, Ordering::SeqCst);
        match self.handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!("Capture loop task failed: {}", e);
                None
            }
        }
    }
}

async fn run(context: CaptureContext, running: Arc<AtomicBool>) -> LoopReport {
    let CaptureContext {
        sources,
        mut engine,
        sink,
        config,
        state,
        counters,
        events,
    } = context;

    let fps = config.read().frame_rate.max(1);
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / fps as f64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!("Capture loop started at {} fps", fps);

    loop {
        ticker.tick().await;
        if !running.load(Ordering::SeqCst) || *state.read() != PipelineState::Recording {
            break;
        }
        // picks up a reconfigured mode on the next tick
        let mode = config.read().mode;
        tick(&mut sources.lock(), &mut engine, mode, Some(&sink), &counters, &events);
    }

    engine.shutdown();
    tracing::info!("Capture loop stopped after {} frames", counters.frame_count());
    LoopReport {
        last_frame: engine.surface().clone(),
        stats: engine.stats(),
    }
}
