//! Encoder stage
//!
//! A dedicated thread owning the [`FrameEncoder`]. Frames arrive over a
//! bounded channel; every chunk interval the produced bytes are cut into a
//! chunk and handed back to the recording pipeline. Stopping drains the
//! encoder and signals completion over a oneshot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use super::types::EncoderProfile;
use super::FrameEncoder;
use crate::capture::PixelBuffer;
use crate::recorder::events::{EventBus, PipelineEvent};
use crate::utils::error::EncoderError;

/// Chunk emission interval
pub const CHUNK_INTERVAL: Duration = Duration::from_secs(1);

/// Frames buffered ahead of the encoder before new ones are dropped
const FRAME_QUEUE: usize = 8;

enum StageMessage {
    Frame(PixelBuffer),
    Stop,
}

/// Non-blocking frame input into the encoder stage
#[derive(Clone)]
pub struct FrameSink {
    tx: SyncSender<StageMessage>,
}

impl FrameSink {
    /// Queue a frame. Returns `false` when it was dropped (queue full or
    /// stage gone).
    pub fn try_submit(&self, frame: PixelBuffer) -> bool {
        match self.tx.try_send(StageMessage::Frame(frame)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Handle to a running encoder thread
pub struct EncoderStage {
    profile: EncoderProfile,
    sink: FrameSink,
    chunks: Receiver<Vec<u8>>,
    emitted: Arc<AtomicUsize>,
    stopped: oneshot::Receiver<Result<(), EncoderError>>,
    thread: JoinHandle<()>,
}

impl EncoderStage {
    pub fn spawn(encoder: Box<dyn FrameEncoder>, events: EventBus) -> Result<Self, EncoderError> {
        Self::spawn_with_interval(encoder, events, CHUNK_INTERVAL)
    }

    pub fn spawn_with_interval(
        encoder: Box<dyn FrameEncoder>,
        events: EventBus,
        interval: Duration,
    ) -> Result<Self, EncoderError> {
        let profile = *encoder.profile();
        let (tx, rx) = mpsc::sync_channel(FRAME_QUEUE);
        let (chunk_tx, chunks) = mpsc::channel();
        let (stopped_tx, stopped) = oneshot::channel();
        let emitted = Arc::new(AtomicUsize::new(0));
        let output = ChunkOutput {
            tx: chunk_tx,
            emitted: emitted.clone(),
            events,
        };

        let thread = std::thread::Builder::new()
            .name("encoder-stage".to_string())
            .spawn(move || run_stage(encoder, rx, output, stopped_tx, interval))?;

        Ok(Self {
            profile,
            sink: FrameSink { tx },
            chunks,
            emitted,
            stopped,
            thread,
        })
    }

    pub fn profile(&self) -> &EncoderProfile {
        &self.profile
    }

    /// A cloneable frame input
    pub fn sink(&self) -> FrameSink {
        self.sink.clone()
    }

    /// Chunks produced so far, collected or not
    pub fn chunks_emitted(&self) -> usize {
        self.emitted.load(Ordering::SeqCst)
    }

    /// Chunks emitted since the last call, in order
    pub fn collect_chunks(&self) -> Vec<Vec<u8>> {
        self.chunks.try_iter().collect()
    }

    /// Drain and stop the encoder. Resolves after the stage signalled
    /// "stopped", returning every chunk not yet collected.
    pub async fn stop(self) -> Result<Vec<Vec<u8>>, EncoderError> {
        let EncoderStage {
            sink,
            chunks,
            stopped,
            thread,
            ..
        } = self;

        // The queue may be full; a blocking send must not stall the runtime
        let tx = sink.tx.clone();
        drop(sink);
        let _ = tokio::task::spawn_blocking(move || tx.send(StageMessage::Stop)).await;

        let result = stopped.await.map_err(|_| EncoderError::StageGone)?;
        let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        result?;

        Ok(chunks.try_iter().collect())
    }
}

/// Where finished chunks go
struct ChunkOutput {
    tx: Sender<Vec<u8>>,
    emitted: Arc<AtomicUsize>,
    events: EventBus,
}

impl ChunkOutput {
    fn emit(&self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        let size = bytes.len();
        if self.tx.send(bytes).is_ok() {
            self.emitted.fetch_add(1, Ordering::SeqCst);
            tracing::debug!("Chunk recorded: {} bytes", size);
            self.events.emit(PipelineEvent::ChunkRecorded { size });
        }
    }
}

fn run_stage(
    mut encoder: Box<dyn FrameEncoder>,
    rx: Receiver<StageMessage>,
    output: ChunkOutput,
    stopped_tx: oneshot::Sender<Result<(), EncoderError>>,
    interval: Duration,
) {
    let mut last_chunk = Instant::now();
    let mut write_failures = 0u64;

    loop {
        let wait = interval.saturating_sub(last_chunk.elapsed());
        match rx.recv_timeout(wait) {
            Ok(StageMessage::Frame(frame)) => {
                if let Err(e) = encoder.write_frame(&frame) {
                    write_failures += 1;
                    if write_failures == 1 {
                        tracing::warn!("Encoder rejected frame: {}", e);
                        output.events.recording_error(&e, "encoder write");
                    }
                }
            }
            Ok(StageMessage::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if last_chunk.elapsed() >= interval {
            output.emit(encoder.drain());
            last_chunk = Instant::now();
        }
    }

    if write_failures > 0 {
        tracing::warn!("Encoder dropped {} frame(s) on write errors", write_failures);
    }

    let result = encoder.finish().map(|tail| output.emit(tail));
    let _ = stopped_tx.send(result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::types::{Container, RecordingFormat};
    use crate::encoder::y4m::Y4mEncoder;
    use crate::recorder::events::drain_events;

    fn y4m(width: u32, height: u32) -> Box<dyn FrameEncoder> {
        let profile = EncoderProfile {
            requested: RecordingFormat::Webm,
            container: Container::Y4m,
            bitrate: 2_500_000,
            fell_back: true,
        };
        Box::new(Y4mEncoder::new(profile, width, height, 10))
    }

    #[tokio::test]
    async fn test_stop_drains_everything() {
        let events = EventBus::new();
        let stage = EncoderStage::spawn(y4m(2, 2), events.clone()).unwrap();
        let sink = stage.sink();
        for _ in 0..3 {
            assert!(sink.try_submit(PixelBuffer::new(2, 2)));
        }

        let chunks = stage.stop().await.unwrap();
        let artifact: Vec<u8> = chunks.concat();
        let header = b"YUV4MPEG2 W2 H2 F10:1 Ip A1:1 C444\n".len();
        assert_eq!(artifact.len(), header + 3 * (6 + 12));

        // the sink outlives the stage without blocking
        assert!(!sink.try_submit(PixelBuffer::new(2, 2)));
    }

    #[tokio::test]
    async fn test_chunks_are_emitted_on_interval() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let stage =
            EncoderStage::spawn_with_interval(y4m(2, 2), events.clone(), Duration::from_millis(20))
                .unwrap();
        let sink = stage.sink();
        sink.try_submit(PixelBuffer::new(2, 2));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let early = stage.collect_chunks();
        assert!(!early.is_empty());
        sink.try_submit(PixelBuffer::new(2, 2));
        let rest = stage.stop().await.unwrap();

        let total: usize = early.iter().chain(rest.iter()).map(Vec::len).sum();
        let header = b"YUV4MPEG2 W2 H2 F10:1 Ip A1:1 C444\n".len();
        assert_eq!(total, header + 2 * 18);

        let recorded = drain_events(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, PipelineEvent::ChunkRecorded { .. }))
            .count();
        assert_eq!(recorded, early.len() + rest.len());
    }

    #[tokio::test]
    async fn test_bad_frames_surface_as_recording_error_once() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let stage = EncoderStage::spawn(y4m(2, 2), events.clone()).unwrap();
        let sink = stage.sink();
        sink.try_submit(PixelBuffer::new(4, 4));
        sink.try_submit(PixelBuffer::new(4, 4));
        stage.stop().await.unwrap();

        let errors = drain_events(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, PipelineEvent::RecordingError { .. }))
            .count();
        assert_eq!(errors, 1);
    }
}
