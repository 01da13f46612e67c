//! Offloaded stitching
//!
//! Stitching more than two sources runs on a dedicated worker thread so the
//! capture tick never waits for it. Requests go through a single-slot
//! mailbox: a new request replaces one the worker has not picked up yet, so
//! at most one request is in flight and one is pending. Results come back
//! over a channel tagged with the request's sequence number.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::layout::{blit_scaled, Rect};
use crate::capture::{CapturedFrame, PixelBuffer};
use crate::utils::error::StitchingError;

/// Elevation (degrees) at and above which a source counts as zenith
pub const ZENITH_ELEVATION: f64 = 60.0;

/// Combines a batch of frames into one panorama
pub trait Stitcher: Send {
    fn name(&self) -> &'static str;

    fn stitch(
        &mut self,
        frames: &[CapturedFrame],
        width: u32,
        height: u32,
    ) -> Result<PixelBuffer, StitchingError>;
}

/// Stitcher selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StitcherKind {
    #[default]
    FirstFrame,
    Azimuth,
}

impl StitcherKind {
    pub fn create(&self) -> Box<dyn Stitcher> {
        match self {
            StitcherKind::FirstFrame => Box::new(FirstFrameStitcher),
            StitcherKind::Azimuth => Box::new(AzimuthStitcher),
        }
    }
}

/// The first frame of the batch, scaled to the target
#[derive(Debug, Default)]
pub struct FirstFrameStitcher;

impl Stitcher for FirstFrameStitcher {
    fn name(&self) -> &'static str {
        "first-frame"
    }

    fn stitch(
        &mut self,
        frames: &[CapturedFrame],
        width: u32,
        height: u32,
    ) -> Result<PixelBuffer, StitchingError> {
        let first = frames
            .first()
            .ok_or_else(|| StitchingError::Failed("empty frame batch".to_string()))?;
        let mut out = PixelBuffer::new(width, height);
        blit_scaled(&first.pixels, &mut out, Rect::new(0, 0, width, height));
        Ok(out)
    }
}

/// Equirectangular placement by azimuth.
///
/// Each ring source covers the columns `azimuth ± fov/2` (wrapping at 360°)
/// over the rows below the zenith band; zenith sources fill the top quarter.
/// No blending: later frames overwrite earlier ones where they overlap.
#[derive(Debug, Default)]
pub struct AzimuthStitcher;

impl AzimuthStitcher {
    fn column_span(azimuth: f64, fov: f64, width: u32) -> (i64, i64) {
        let w = width as f64;
        let start = ((azimuth - fov / 2.0) / 360.0 * w).floor() as i64;
        let span = (fov.clamp(0.0, 360.0) / 360.0 * w).round() as i64;
        (start, span.max(1))
    }
}

impl Stitcher for AzimuthStitcher {
    fn name(&self) -> &'static str {
        "azimuth"
    }

    fn stitch(
        &mut self,
        frames: &[CapturedFrame],
        width: u32,
        height: u32,
    ) -> Result<PixelBuffer, StitchingError> {
        if frames.is_empty() {
            return Err(StitchingError::Failed("empty frame batch".to_string()));
        }
        let mut out = PixelBuffer::new(width, height);
        let has_zenith = frames
            .iter()
            .any(|f| f.position.elevation >= ZENITH_ELEVATION);
        let band = if has_zenith { height / 4 } else { 0 };

        for frame in frames {
            if frame.position.elevation >= ZENITH_ELEVATION {
                blit_scaled(&frame.pixels, &mut out, Rect::new(0, 0, width, band));
                continue;
            }

            let rows = height - band;
            let (start, span) = Self::column_span(
                frame.position.azimuth,
                frame.calibration.field_of_view,
                width,
            );
            let src = &frame.pixels;
            if src.is_empty() || rows == 0 {
                continue;
            }
            for dy in 0..rows {
                let sy = (dy as u64 * src.height() as u64 / rows as u64) as u32;
                for i in 0..span {
                    let dx = (start + i).rem_euclid(width as i64) as u32;
                    let sx = (i as u64 * src.width() as u64 / span as u64) as u32;
                    out.set_pixel(dx, band + dy, src.pixel(sx, sy));
                }
            }
        }
        Ok(out)
    }
}

/// A batch submitted to the worker
pub struct StitchRequest {
    pub seq: u64,
    pub frames: Vec<CapturedFrame>,
    pub width: u32,
    pub height: u32,
}

/// The worker's answer to a request
#[derive(Debug)]
pub struct StitchResult {
    pub seq: u64,
    pub outcome: Result<PixelBuffer, StitchingError>,
}

#[derive(Default)]
struct Mailbox {
    pending: Option<StitchRequest>,
    shutdown: bool,
    superseded: u64,
}

#[derive(Default)]
struct Shared {
    mailbox: Mutex<Mailbox>,
    wake: Condvar,
}

/// Handle to the stitch worker thread
pub struct StitchWorker {
    shared: Arc<Shared>,
    results: Option<Receiver<StitchResult>>,
    thread: Option<JoinHandle<()>>,
}

impl StitchWorker {
    pub fn spawn(stitcher: Box<dyn Stitcher>) -> Result<Self, StitchingError> {
        let shared = Arc::new(Shared::default());
        let (tx, rx) = mpsc::channel();
        let name = stitcher.name();

        let worker_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name("stitch-worker".to_string())
            .spawn(move || run_worker(stitcher, worker_shared, tx))
            .map_err(|e| StitchingError::Failed(format!("Failed to spawn stitch worker: {}", e)))?;

        tracing::debug!("Stitch worker started ({})", name);
        Ok(Self {
            shared,
            results: Some(rx),
            thread: Some(thread),
        })
    }

    /// Queue a request. Returns `true` when it replaced one that had not
    /// started yet.
    pub fn submit(&self, request: StitchRequest) -> bool {
        let mut mailbox = self.shared.mailbox.lock();
        if mailbox.shutdown {
            return false;
        }
        let replaced = mailbox.pending.replace(request).is_some();
        if replaced {
            mailbox.superseded += 1;
        }
        drop(mailbox);
        self.shared.wake.notify_one();
        replaced
    }

    /// Finished results in completion order. Empty after shutdown.
    pub fn try_results(&self) -> Result<Vec<StitchResult>, StitchingError> {
        let Some(rx) = &self.results else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(result) => out.push(result),
                Err(TryRecvError::Empty) => return Ok(out),
                Err(TryRecvError::Disconnected) if out.is_empty() => {
                    return Err(StitchingError::WorkerGone)
                }
                Err(TryRecvError::Disconnected) => return Ok(out),
            }
        }
    }

    /// Requests replaced before the worker picked them up
    pub fn superseded(&self) -> u64 {
        self.shared.mailbox.lock().superseded
    }

    /// Stop the worker. In-flight results are discarded; the thread is not
    /// joined so a long stitch cannot stall the caller.
    pub fn shutdown(&mut self) {
        {
            let mut mailbox = self.shared.mailbox.lock();
            if mailbox.shutdown {
                return;
            }
            mailbox.shutdown = true;
            mailbox.pending = None;
        }
        self.shared.wake.notify_all();
        self.results = None;
        // an idle worker exits at once; a busy one is left to finish alone
        if let Some(handle) = self.thread.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
        tracing::debug!("Stitch worker shut down");
    }
}

impl Drop for StitchWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "stitcher panicked".to_string()
    }
}

fn run_worker(mut stitcher: Box<dyn Stitcher>, shared: Arc<Shared>, tx: Sender<StitchResult>) {
    loop {
        let request = {
            let mut mailbox = shared.mailbox.lock();
            loop {
                if mailbox.shutdown {
                    return;
                }
                if let Some(request) = mailbox.pending.take() {
                    break request;
                }
                shared.wake.wait(&mut mailbox);
            }
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            stitcher.stitch(&request.frames, request.width, request.height)
        }))
        .unwrap_or_else(|payload| Err(StitchingError::Failed(panic_message(payload))));

        if shared.mailbox.lock().shutdown {
            return;
        }
        if tx
            .send(StitchResult {
                seq: request.seq,
                outcome,
            })
            .is_err()
        {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Calibration, SourcePosition};
    use chrono::Utc;
    use std::time::{Duration, Instant};

    fn frame(color: [u8; 4], azimuth: f64, elevation: f64, fov: f64) -> CapturedFrame {
        CapturedFrame {
            source_id: format!("src-{azimuth}-{elevation}"),
            pixels: PixelBuffer::filled(8, 8, color),
            captured_at: Utc::now(),
            position: SourcePosition::new(azimuth, elevation),
            calibration: Calibration {
                field_of_view: fov,
                ..Calibration::default()
            },
        }
    }

    fn request(seq: u64) -> StitchRequest {
        StitchRequest {
            seq,
            frames: vec![frame([seq as u8, 0, 0, 255], 0.0, 0.0, 90.0)],
            width: 4,
            height: 4,
        }
    }

    /// Blocks each stitch until the test releases it
    struct GatedStitcher {
        started: Sender<()>,
        gate: Receiver<()>,
    }

    impl Stitcher for GatedStitcher {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn stitch(
            &mut self,
            frames: &[CapturedFrame],
            width: u32,
            height: u32,
        ) -> Result<PixelBuffer, StitchingError> {
            let _ = self.started.send(());
            let _ = self.gate.recv();
            FirstFrameStitcher.stitch(frames, width, height)
        }
    }

    struct PanickingStitcher;

    impl Stitcher for PanickingStitcher {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn stitch(&mut self, _: &[CapturedFrame], _: u32, _: u32) -> Result<PixelBuffer, StitchingError> {
            panic!("lens table corrupted");
        }
    }

    fn wait_for_results(worker: &StitchWorker, count: usize) -> Vec<StitchResult> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut results = Vec::new();
        while results.len() < count && Instant::now() < deadline {
            results.extend(worker.try_results().unwrap());
            std::thread::sleep(Duration::from_millis(5));
        }
        results
    }

    #[test]
    fn test_stitcher_kind_names() {
        let kind: StitcherKind = serde_json::from_str("\"azimuth\"").unwrap();
        assert_eq!(kind.create().name(), "azimuth");
        assert_eq!(StitcherKind::default().create().name(), "first-frame");
    }

    #[test]
    fn test_first_frame_stitcher_rejects_empty_batch() {
        assert!(FirstFrameStitcher.stitch(&[], 4, 4).is_err());
        let out = FirstFrameStitcher
            .stitch(&[frame([7, 7, 7, 255], 0.0, 0.0, 90.0)], 4, 2)
            .unwrap();
        assert_eq!((out.width(), out.height()), (4, 2));
        assert_eq!(out.pixel(3, 1), [7, 7, 7, 255]);
    }

    #[test]
    fn test_azimuth_stitcher_places_by_azimuth() {
        let frames = vec![
            frame([1, 0, 0, 255], 45.0, 0.0, 90.0),
            frame([2, 0, 0, 255], 225.0, 0.0, 90.0),
            frame([3, 0, 0, 255], 0.0, 90.0, 90.0),
        ];
        let out = AzimuthStitcher.stitch(&frames, 360, 100).unwrap();
        // zenith band
        assert_eq!(out.pixel(200, 10), [3, 0, 0, 255]);
        // 45° ± 45° covers columns 0..90
        assert_eq!(out.pixel(10, 60), [1, 0, 0, 255]);
        assert_eq!(out.pixel(89, 99), [1, 0, 0, 255]);
        // 225° ± 45° covers columns 180..270
        assert_eq!(out.pixel(200, 60), [2, 0, 0, 255]);
        // uncovered columns stay black
        assert_eq!(out.pixel(120, 60), [0, 0, 0, 255]);
    }

    #[test]
    fn test_azimuth_stitcher_wraps_at_360() {
        let frames = vec![frame([5, 0, 0, 255], 0.0, 0.0, 90.0)];
        let out = AzimuthStitcher.stitch(&frames, 360, 10).unwrap();
        assert_eq!(out.pixel(350, 5), [5, 0, 0, 255]);
        assert_eq!(out.pixel(40, 5), [5, 0, 0, 255]);
        assert_eq!(out.pixel(180, 5), [0, 0, 0, 255]);
    }

    #[test]
    fn test_mailbox_supersedes_unstarted_request() {
        let (started_tx, started) = mpsc::channel();
        let (release, gate) = mpsc::channel();
        let worker = StitchWorker::spawn(Box::new(GatedStitcher {
            started: started_tx,
            gate,
        }))
        .unwrap();

        assert!(!worker.submit(request(1)));
        started.recv_timeout(Duration::from_secs(5)).unwrap();
        // 1 is in flight; 2 waits and is then replaced by 3
        assert!(!worker.submit(request(2)));
        assert!(worker.submit(request(3)));
        release.send(()).unwrap();
        release.send(()).unwrap();

        let seqs: Vec<u64> = wait_for_results(&worker, 2).iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 3]);
        assert_eq!(worker.superseded(), 1);
    }

    #[test]
    fn test_panicking_stitcher_becomes_error_result() {
        let worker = StitchWorker::spawn(Box::new(PanickingStitcher)).unwrap();
        worker.submit(request(7));
        let results = wait_for_results(&worker, 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].seq, 7);
        match &results[0].outcome {
            Err(StitchingError::Failed(msg)) => assert!(msg.contains("lens table")),
            other => panic!("unexpected outcome: {other:?}"),
        }

        // the worker survives the panic
        worker.submit(request(8));
        assert_eq!(wait_for_results(&worker, 1)[0].seq, 8);
    }

    #[test]
    fn test_shutdown_discards_results() {
        let mut worker = StitchWorker::spawn(Box::new(FirstFrameStitcher)).unwrap();
        worker.submit(request(1));
        worker.shutdown();
        assert!(worker.try_results().unwrap().is_empty());
        assert!(!worker.submit(request(2)));
    }
}
