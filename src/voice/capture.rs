//! Audio capture from microphone
//!
//! Capture runs on a dedicated thread that owns the `cpal` input stream
//! (streams aren't `Send`). The device callback never shares buffers with the
//! coordinator: every frame is copied into an owned [`AudioFrame`] and moved
//! through an unbounded channel.

use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use std::thread;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, SampleRate, Stream, StreamConfig, SupportedBufferSize};
use tokio::sync::mpsc;

use super::frame::{AudioFrame, ChunkAccumulator, extract_mono};
use crate::{Error, Result};

/// Sample rate for socket streaming (matches the server's PCM16 rate)
pub const SAMPLE_RATE: u32 = 24000;

/// Samples per frame for the PCM strategy (one render quantum)
pub const DEFAULT_BLOCK_SIZE: u32 = 128;

/// Sending half of the frame channel
pub type FrameSender = mpsc::UnboundedSender<AudioFrame>;

/// Receiving half of the frame channel
pub type FrameReceiver = mpsc::UnboundedReceiver<AudioFrame>;

/// A producer of audio frames
///
/// `start` acquires the input device and begins pushing frames into
/// `frames`. Acquisition is the only suspension point; frames then arrive in
/// production order until the returned handle is stopped or dropped.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Acquire the input and begin delivering frames
    ///
    /// # Errors
    ///
    /// Returns [`Error::Permission`] if the microphone cannot be opened
    async fn start(&self, frames: FrameSender) -> Result<CaptureHandle>;

    /// Rate of the frames this source produces
    fn sample_rate(&self) -> u32;
}

/// Owns a running capture; stopping it ends frame delivery
pub struct CaptureHandle {
    on_stop: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CaptureHandle {
    /// Create a handle that runs `on_stop` exactly once
    pub fn new(on_stop: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            on_stop: Some(Box::new(on_stop)),
        }
    }

    /// Stop the capture (idempotent)
    pub fn stop(&mut self) {
        if let Some(on_stop) = self.on_stop.take() {
            on_stop();
        }
    }

    /// Whether the capture is still running
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.on_stop.is_some()
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("running", &self.is_running())
            .finish()
    }
}

/// Input device parameters
#[derive(Debug, Clone, Copy)]
struct DeviceRequest {
    sample_rate: u32,
    block_size: Option<u32>,
}

/// Emits one frame per device callback
///
/// Requests a fixed buffer of `block_size` samples when the device allows
/// it, so frames match the render quantum. Nothing is buffered between
/// callbacks.
#[derive(Debug, Clone)]
pub struct PcmFrameSource {
    sample_rate: u32,
    block_size: u32,
}

impl PcmFrameSource {
    /// Create a PCM source
    #[must_use]
    pub const fn new(sample_rate: u32, block_size: u32) -> Self {
        Self {
            sample_rate,
            block_size,
        }
    }
}

impl Default for PcmFrameSource {
    fn default() -> Self {
        Self::new(SAMPLE_RATE, DEFAULT_BLOCK_SIZE)
    }
}

#[async_trait]
impl FrameSource for PcmFrameSource {
    async fn start(&self, frames: FrameSender) -> Result<CaptureHandle> {
        let request = DeviceRequest {
            sample_rate: self.sample_rate,
            block_size: Some(self.block_size),
        };
        let sample_rate = self.sample_rate;

        let on_data = move |data: &[f32], channels| {
            if let Some(frame) = extract_mono(data, channels, sample_rate) {
                // Receiver gone means the session is tearing down
                let _ = frames.send(frame);
            }
        };

        spawn_blocking_capture(move || build_input(request, on_data), || {}).await
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Emits fixed-duration chunks instead of per-callback frames
///
/// Higher latency than [`PcmFrameSource`], fewer and larger messages.
/// Optionally drops chunks that are entirely zero, which some devices produce
/// while warming up.
#[derive(Debug, Clone)]
pub struct ChunkedFrameSource {
    sample_rate: u32,
    chunk_ms: u32,
    skip_silent: bool,
}

impl ChunkedFrameSource {
    /// Create a chunked source
    #[must_use]
    pub const fn new(sample_rate: u32, chunk_ms: u32, skip_silent: bool) -> Self {
        Self {
            sample_rate,
            chunk_ms,
            skip_silent,
        }
    }
}

#[async_trait]
impl FrameSource for ChunkedFrameSource {
    async fn start(&self, frames: FrameSender) -> Result<CaptureHandle> {
        let request = DeviceRequest {
            sample_rate: self.sample_rate,
            block_size: None,
        };
        let sample_rate = self.sample_rate;
        let accumulator = ChunkAccumulator::new(self.sample_rate, self.chunk_ms, self.skip_silent);
        let writer = Arc::new(Mutex::new(Some(ChunkWriter::new(accumulator, frames))));

        let feed = Arc::clone(&writer);
        let on_data = move |data: &[f32], channels| {
            let Some(mono) = extract_mono(data, channels, sample_rate) else {
                return;
            };
            let Ok(mut slot) = feed.lock() else {
                return;
            };
            if let Some(writer) = slot.as_mut() {
                writer.push(mono.samples());
            }
        };

        // The partial chunk goes out before the frame channel closes
        let on_stop = move || {
            let finished = writer.lock().ok().and_then(|mut slot| slot.take());
            if let Some(writer) = finished {
                writer.finish();
            }
        };

        spawn_blocking_capture(move || build_input(request, on_data), on_stop).await
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Feeds callback audio through a [`ChunkAccumulator`] into the frame channel
struct ChunkWriter {
    accumulator: ChunkAccumulator,
    frames: FrameSender,
}

impl ChunkWriter {
    const fn new(accumulator: ChunkAccumulator, frames: FrameSender) -> Self {
        Self {
            accumulator,
            frames,
        }
    }

    fn push(&mut self, samples: &[f32]) {
        for chunk in self.accumulator.push(samples) {
            let _ = self.frames.send(chunk);
        }
    }

    /// Send whatever partial chunk is left, then close the channel
    fn finish(mut self) {
        if let Some(tail) = self.accumulator.flush() {
            tracing::debug!(samples = tail.len(), "flushing final audio chunk");
            let _ = self.frames.send(tail);
        }
    }
}

/// Open the capture thread without blocking the async runtime
async fn spawn_blocking_capture<S, B, E>(build: B, on_stop: E) -> Result<CaptureHandle>
where
    B: FnOnce() -> Result<S> + Send + 'static,
    E: FnOnce() + Send + 'static,
{
    tokio::task::spawn_blocking(move || spawn_capture_thread(build, on_stop))
        .await
        .map_err(|e| Error::Audio(format!("capture task failed: {e}")))?
}

/// Start a thread owning the input stream; returns once the stream is live
///
/// `build` runs on the capture thread, so the stream never has to be `Send`.
/// `on_stop` runs on that thread after the stream is dropped.
fn spawn_capture_thread<S, B, E>(build: B, on_stop: E) -> Result<CaptureHandle>
where
    B: FnOnce() -> Result<S> + Send + 'static,
    E: FnOnce() + Send + 'static,
{
    let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<()>>(1);
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

    let thread = thread::Builder::new()
        .name("audio-capture".to_string())
        .spawn(move || {
            let stream = match build() {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));

            // Parked until stop is requested or the handle is dropped
            let _ = stop_rx.recv();

            // No callback runs once the stream is gone
            drop(stream);
            on_stop();
            tracing::debug!("audio capture stopped");
        })?;

    match ready_rx.recv() {
        // The thread is detached; it releases the device and exits by itself
        Ok(Ok(())) => Ok(CaptureHandle::new(move || {
            let _ = stop_tx.send(());
        })),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(_) => Err(Error::Audio(
            "capture thread exited before the stream started".to_string(),
        )),
    }
}

/// Pick an input config covering the requested rate, preferring mono `f32`
fn select_input_config(device: &Device, request: DeviceRequest) -> Result<StreamConfig> {
    let rate = SampleRate(request.sample_rate);

    let mut candidates: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| Error::Permission(e.to_string()))?
        .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
        .collect();

    candidates.sort_by_key(|c| (c.channels() != 1, c.sample_format() != SampleFormat::F32));

    let supported = candidates
        .into_iter()
        .next()
        .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

    let buffer_size = match (request.block_size, supported.buffer_size()) {
        (Some(block), SupportedBufferSize::Range { min, max })
            if (*min..=*max).contains(&block) =>
        {
            BufferSize::Fixed(block)
        }
        _ => BufferSize::Default,
    };

    let mut config = supported.with_sample_rate(rate).config();
    config.buffer_size = buffer_size;
    Ok(config)
}

/// Build and start the input stream on the current thread
fn build_input<F>(request: DeviceRequest, mut on_data: F) -> Result<Stream>
where
    F: FnMut(&[f32], usize) + Send + 'static,
{
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Permission("no input device available".to_string()))?;

    let config = select_input_config(&device, request)?;
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = request.sample_rate,
        channels = config.channels,
        buffer = ?config.buffer_size,
        "audio capture initialized"
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| on_data(data, channels),
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Permission(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    tracing::debug!("audio capture started");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use tokio::sync::mpsc::error::TryRecvError;

    use super::*;

    /// Stand-in for a device stream that is slow to release
    struct SlowRelease(Duration);

    impl Drop for SlowRelease {
        fn drop(&mut self) {
            thread::sleep(self.0);
        }
    }

    #[test]
    fn test_capture_handle_stops_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut handle = CaptureHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(handle.is_running());

        handle.stop();
        handle.stop();
        drop(handle);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_capture_handle_stops_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        drop(CaptureHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_source_rates() {
        assert_eq!(PcmFrameSource::default().sample_rate(), SAMPLE_RATE);
        assert_eq!(ChunkedFrameSource::new(16000, 1000, true).sample_rate(), 16000);
    }

    #[test]
    fn test_stop_does_not_wait_for_device_release() {
        let (done_tx, done_rx) = std_mpsc::channel();
        let mut handle = spawn_capture_thread(
            || Ok(SlowRelease(Duration::from_millis(300))),
            move || {
                let _ = done_tx.send(());
            },
        )
        .unwrap();

        let stopping = Instant::now();
        handle.stop();
        assert!(stopping.elapsed() < Duration::from_millis(150));

        // Teardown still completes on the capture thread
        assert!(done_rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn test_failed_build_is_reported() {
        let result = spawn_capture_thread(
            || Err::<(), _>(Error::Permission("denied".to_string())),
            || {},
        );
        assert!(matches!(result, Err(Error::Permission(_))));
    }

    #[test]
    fn test_chunk_writer_flushes_partial_chunk() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut writer = ChunkWriter::new(ChunkAccumulator::new(1000, 100, false), tx);

        writer.push(&[0.5; 150]);
        assert_eq!(rx.try_recv().unwrap().len(), 100);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        writer.finish();
        assert_eq!(rx.try_recv().unwrap().len(), 50);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[test]
    fn test_capture_thread_flushes_after_stop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let writer = Arc::new(Mutex::new(Some(ChunkWriter::new(
            ChunkAccumulator::new(1000, 100, false),
            tx,
        ))));

        let feed = Arc::clone(&writer);
        let mut handle = spawn_capture_thread(
            || Ok(()),
            move || {
                if let Some(writer) = writer.lock().unwrap().take() {
                    writer.finish();
                }
            },
        )
        .unwrap();

        feed.lock().unwrap().as_mut().unwrap().push(&[0.25; 40]);
        handle.stop();

        let tail = rx.blocking_recv().unwrap();
        assert_eq!(tail.len(), 40);
        assert!(rx.blocking_recv().is_none());
    }
}
