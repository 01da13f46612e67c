//! Projection and stitching
//!
//! Composes each tick's batch of captured frames into one output surface
//! at the session resolution. The mode decides the layout; panoramas from
//! more than two sources are stitched on a worker thread and used only
//! while fresh.

pub mod fisheye;
pub mod layout;
pub mod stitcher;

pub use stitcher::{AzimuthStitcher, FirstFrameStitcher, StitchWorker, Stitcher, StitcherKind};

use serde::{Deserialize, Serialize};

use crate::capture::{CapturedFrame, PixelBuffer, Resolution, SourcePosition};
use crate::recorder::events::EventBus;
use layout::Rect;
use stitcher::StitchRequest;

const OPPOSING_TOLERANCE: f64 = 1.0;

/// How captured frames are laid out in the recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordingMode {
    Standard,
    #[serde(rename = "panoramic-180")]
    Panoramic180,
    #[default]
    #[serde(rename = "panoramic-360")]
    Panoramic360,
    Stereo,
    MultiAngle,
    Tracking,
}

impl RecordingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingMode::Standard => "standard",
            RecordingMode::Panoramic180 => "panoramic-180",
            RecordingMode::Panoramic360 => "panoramic-360",
            RecordingMode::Stereo => "stereo",
            RecordingMode::MultiAngle => "multi-angle",
            RecordingMode::Tracking => "tracking",
        }
    }
}

/// What one `compose` call did to the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Composition {
    /// Nothing to draw; the previous surface stands
    Unchanged,
    Standard,
    Unwrapped,
    DualFisheye,
    SideBySide,
    Grid { cols: u32, rows: u32 },
    /// A worker result from request `seq` was used
    Stitched { seq: u64 },
    /// No fresh stitch result; standard composition instead
    StitchFallback,
}

/// Counters exposed through pipeline status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionStats {
    pub stitched: u64,
    pub stitch_fallbacks: u64,
    pub stitch_superseded: u64,
}

/// Per-session composition engine owning the output surface
pub struct ProjectionEngine {
    surface: PixelBuffer,
    /// Sources the rig has, not how many delivered this tick
    rig_sources: usize,
    worker: Option<StitchWorker>,
    events: EventBus,
    next_seq: u64,
    /// Newest finished stitch not yet placed on the surface
    ready: Option<(u64, PixelBuffer)>,
    latest_stitch_seq: Option<u64>,
    stats: ProjectionStats,
}

impl ProjectionEngine {
    pub fn new(
        resolution: Resolution,
        rig_sources: usize,
        stitcher: Option<Box<dyn Stitcher>>,
        events: EventBus,
    ) -> Self {
        let worker = stitcher.and_then(|s| match StitchWorker::spawn(s) {
            Ok(worker) => Some(worker),
            Err(e) => {
                tracing::warn!("Stitching disabled: {}", e);
                events.stitching_error(&e, "spawn stitch worker");
                None
            }
        });

        Self {
            surface: PixelBuffer::new(resolution.width, resolution.height),
            rig_sources,
            worker,
            events,
            next_seq: 1,
            ready: None,
            latest_stitch_seq: None,
            stats: ProjectionStats::default(),
        }
    }

    pub fn surface(&self) -> &PixelBuffer {
        &self.surface
    }

    pub fn stats(&self) -> ProjectionStats {
        let mut stats = self.stats;
        if let Some(worker) = &self.worker {
            stats.stitch_superseded = worker.superseded();
        }
        stats
    }

    /// Sequence number of the last stitch result placed on the surface
    pub fn latest_stitch_seq(&self) -> Option<u64> {
        self.latest_stitch_seq
    }

    /// Compose one tick's frames into the surface
    pub fn compose(&mut self, frames: &[CapturedFrame], mode: RecordingMode) -> Composition {
        if frames.is_empty() {
            return Composition::Unchanged;
        }
        let bounds = Rect::full(&self.surface);

        match mode {
            RecordingMode::Standard | RecordingMode::Tracking => self.compose_standard(frames),
            RecordingMode::Panoramic180 | RecordingMode::Panoramic360 => {
                let range = if mode == RecordingMode::Panoramic180 {
                    fisheye::RANGE_180
                } else {
                    fisheye::RANGE_360
                };
                match frames {
                    [only] if self.rig_sources == 1 => {
                        let surface = &mut self.surface;
                        fisheye::unwrap_into(&only.pixels, &only.calibration, range, surface, bounds);
                        Composition::Unwrapped
                    }
                    // front camera on top, back camera below
                    [front, back]
                        if self.rig_sources == 2 && opposing(front.position, back.position) =>
                    {
                        let (top, bottom) = layout::split_vertical(bounds);
                        let half = fisheye::RANGE_180;
                        let surface = &mut self.surface;
                        fisheye::unwrap_into(&front.pixels, &front.calibration, half, surface, top);
                        fisheye::unwrap_into(&back.pixels, &back.calibration, half, surface, bottom);
                        Composition::DualFisheye
                    }
                    _ => self.compose_stitched(frames),
                }
            }
            RecordingMode::Stereo => match frames {
                [left, right, ..] => {
                    let (l, r) = layout::split_horizontal(bounds);
                    layout::blit_scaled(&left.pixels, &mut self.surface, l);
                    layout::blit_scaled(&right.pixels, &mut self.surface, r);
                    Composition::SideBySide
                }
                _ => Composition::Unchanged,
            },
            RecordingMode::MultiAngle => {
                let (cols, rows) = layout::grid_dimensions(frames.len());
                for (i, frame) in frames.iter().enumerate() {
                    let cell = layout::grid_cell(bounds, cols, rows, i);
                    layout::blit_scaled(&frame.pixels, &mut self.surface, cell);
                }
                Composition::Grid { cols, rows }
            }
        }
    }

    fn compose_standard(&mut self, frames: &[CapturedFrame]) -> Composition {
        let bounds = Rect::full(&self.surface);
        if let Some(first) = frames.first() {
            layout::blit_scaled(&first.pixels, &mut self.surface, bounds);
        }
        Composition::Standard
    }

    fn compose_stitched(&mut self, frames: &[CapturedFrame]) -> Composition {
        let seq = self.next_seq;
        self.next_seq += 1;

        if let Some(worker) = &self.worker {
            worker.submit(StitchRequest {
                seq,
                frames: frames.to_vec(),
                width: self.surface.width(),
                height: self.surface.height(),
            });
        }
        self.poll_stitch_results();

        match self.ready.take() {
            Some((done, buffer)) if done + 1 >= seq => {
                self.place(done, buffer);
                Composition::Stitched { seq: done }
            }
            _ => {
                self.stats.stitch_fallbacks += 1;
                tracing::debug!("No fresh stitch for request {}; composing standard", seq);
                self.compose_standard(frames);
                Composition::StitchFallback
            }
        }
    }

    fn place(&mut self, seq: u64, buffer: PixelBuffer) {
        if buffer.width() == self.surface.width() && buffer.height() == self.surface.height() {
            self.surface = buffer;
        } else {
            let bounds = Rect::full(&self.surface);
            layout::blit_scaled(&buffer, &mut self.surface, bounds);
        }
        self.latest_stitch_seq = Some(seq);
        self.stats.stitched += 1;
    }

    /// Collect finished stitch results, keeping the newest success.
    /// Failures are reported as `stitching-error` events. Returns the
    /// number of results received.
    pub fn poll_stitch_results(&mut self) -> usize {
        let Some(worker) = &self.worker else {
            return 0;
        };

        let results = match worker.try_results() {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!("Stitch worker lost: {}", e);
                self.events.stitching_error(&e, "stitch worker");
                self.worker = None;
                return 0;
            }
        };

        let received = results.len();
        for result in results {
            match result.outcome {
                Ok(buffer) => {
                    let newer = self.ready.as_ref().map_or(true, |(s, _)| result.seq > *s);
                    if newer {
                        self.ready = Some((result.seq, buffer));
                    }
                }
                Err(e) => {
                    tracing::warn!("Stitch request {} failed: {}", result.seq, e);
                    self.events
                        .stitching_error(&e, format!("stitch request {}", result.seq));
                }
            }
        }
        received
    }

    /// Stop the stitch worker; in-flight results are discarded
    pub fn shutdown(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            self.stats.stitch_superseded = worker.superseded();
            worker.shutdown();
        }
        self.ready = None;
    }

    pub fn has_stitch_worker(&self) -> bool {
        self.worker.is_some()
    }
}

/// Azimuths within a degree of 180° apart
fn opposing(a: SourcePosition, b: SourcePosition) -> bool {
    let apart = (a.azimuth - b.azimuth).rem_euclid(360.0);
    (apart - 180.0).abs() <= OPPOSING_TOLERANCE
}
