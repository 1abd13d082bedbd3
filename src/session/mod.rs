//! Socket session lifecycle
//!
//! A [`SessionController`] owns at most one live session: a capture, a
//! [`SocketTransport`] and the tasks wiring them together. Starting while a
//! session is live tears the old one down first. Stopping returns to idle
//! immediately but keeps the transport open for a grace delay so the server
//! can flush its final transcript and audio.

mod observer;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

pub use observer::{LogObserver, SessionObserver};

use crate::Result;
use crate::transport::{InboundMessage, ReadyState, SocketTransport};
use crate::voice::{CaptureHandle, FrameReceiver, FrameSource, PlaybackSink, pcm, wav};

/// Default socket endpoint
pub const DEFAULT_SOCKET_URL: &str = "ws://localhost:8080/audio";

/// Default delay between `stop()` and closing the transport
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Upper bound on flushing frames already captured when stopping
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Upper bound on waiting for a replaced session's socket to close
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Session parameters
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// WebSocket endpoint
    pub url: String,
    /// Time the transport stays open after `stop()`
    pub grace: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOCKET_URL.to_string(),
            grace: DEFAULT_GRACE,
        }
    }
}

struct Session {
    transport: Arc<SocketTransport>,
    capture: CaptureHandle,
    pump: JoinHandle<()>,
}

/// Starts and stops socket streaming sessions
pub struct SessionController {
    settings: SessionSettings,
    source: Arc<dyn FrameSource>,
    sink: Arc<dyn PlaybackSink>,
    observer: Arc<dyn SessionObserver>,
    current: Mutex<Option<Session>>,
    generation: AtomicU64,
    draining: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl SessionController {
    /// Create an idle controller
    #[must_use]
    pub fn new(
        settings: SessionSettings,
        source: Arc<dyn FrameSource>,
        sink: Arc<dyn PlaybackSink>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            settings,
            source,
            sink,
            observer,
            current: Mutex::new(None),
            generation: AtomicU64::new(0),
            draining: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Session parameters
    #[must_use]
    pub const fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Start capturing and streaming
    ///
    /// Returns `Ok(false)` if a newer `start` or `stop` ran while the previous
    /// session was being torn down or the microphone was being acquired; any
    /// acquisition is released and nothing is started.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Permission`] if the microphone cannot be
    /// opened. There is no retry; call `start` again.
    pub async fn start(&self) -> Result<bool> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut current = self.current.lock().await;
            if let Some(old) = current.take() {
                tracing::info!("replacing active session");
                teardown(old).await;
            }
        }

        if self.is_superseded(generation) {
            tracing::debug!(generation, "start superseded while replacing session");
            return Ok(false);
        }

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let acquired = self.source.start(frames_tx).await;

        let mut current = self.current.lock().await;
        if self.is_superseded(generation) {
            tracing::debug!(generation, "discarding stale microphone acquisition");
            // Dropping the handle stops the capture
            drop(acquired);
            return Ok(false);
        }
        let capture = acquired?;

        if let Some(old) = current.take() {
            teardown(old).await;
        }

        let transport = Arc::new(SocketTransport::open(&self.settings.url));

        if let Some(inbound) = transport.take_inbound() {
            tokio::spawn(route_inbound(
                inbound,
                Arc::clone(&self.sink),
                Arc::clone(&self.observer),
            ));
        }
        tokio::spawn(forward_status(
            transport.subscribe(),
            Arc::clone(&self.observer),
        ));
        let pump = tokio::spawn(pump_frames(frames_rx, Arc::clone(&transport)));

        tracing::info!(
            url = %self.settings.url,
            sample_rate = self.source.sample_rate(),
            "session started"
        );

        *current = Some(Session {
            transport,
            capture,
            pump,
        });
        Ok(true)
    }

    fn is_superseded(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    /// Stop capturing (idempotent)
    ///
    /// Returns once the capture is released. The transport receives the
    /// end-of-utterance frame and is closed after the grace delay in the
    /// background; see [`Self::drain`].
    pub async fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);

        let Some(session) = self.current.lock().await.take() else {
            return;
        };
        let Session {
            transport,
            mut capture,
            mut pump,
        } = session;

        capture.stop();
        // Frames captured before the stop still go out
        if tokio::time::timeout(PUMP_DRAIN_TIMEOUT, &mut pump)
            .await
            .is_err()
        {
            pump.abort();
        }

        transport.send_end();

        let grace = self.settings.grace;
        let closer = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            tracing::debug!(url = transport.url(), "grace delay elapsed, closing socket");
            transport.close_and_wait(TEARDOWN_TIMEOUT).await;
        });

        if let Ok(mut draining) = self.draining.lock() {
            draining.retain(|task| !task.is_finished());
            draining.push(closer);
        }

        tracing::info!(grace_ms = grace.as_millis(), "session stopped");
    }

    /// Wait for every stopped session's transport to close
    pub async fn drain(&self) {
        let pending: Vec<_> = self
            .draining
            .lock()
            .map(|mut draining| draining.drain(..).collect())
            .unwrap_or_default();

        for task in pending {
            let _ = task.await;
        }
    }

    /// Whether a session is capturing
    pub async fn is_capturing(&self) -> bool {
        self.current.lock().await.is_some()
    }

    /// Ready-state of the live session's transport
    pub async fn status(&self) -> Option<watch::Receiver<ReadyState>> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|session| session.transport.subscribe())
    }
}

/// Stop a session without waiting out the grace delay
async fn teardown(session: Session) {
    let Session {
        transport,
        mut capture,
        pump,
    } = session;

    capture.stop();
    pump.abort();
    transport.send_end();
    transport.close_and_wait(TEARDOWN_TIMEOUT).await;
}

/// Encode captured frames and push them to the socket, in order
async fn pump_frames(mut frames: FrameReceiver, transport: Arc<SocketTransport>) {
    let mut dropped = 0usize;

    while let Some(frame) = frames.recv().await {
        let encoded = pcm::encode(frame.samples());
        if !transport.send(&encoded) {
            dropped += 1;
        }
    }

    if dropped > 0 {
        tracing::debug!(dropped, "frames dropped while socket was not open");
    }
}

/// Route inbound messages: transcripts to the observer, audio to playback
async fn route_inbound(
    mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
    sink: Arc<dyn PlaybackSink>,
    observer: Arc<dyn SessionObserver>,
) {
    while let Some(message) = inbound.recv().await {
        match message {
            InboundMessage::Text(event) => observer.on_transcript(&event),
            InboundMessage::Audio(chunk) => {
                tracing::debug!(bytes = chunk.bytes.len(), "received response audio");
                sink.play(wav::wrap(&chunk.bytes));
            }
        }
    }
}

/// Report ready-state changes until the transport closes
async fn forward_status(
    mut state: watch::Receiver<ReadyState>,
    observer: Arc<dyn SessionObserver>,
) {
    let mut last = *state.borrow_and_update();
    observer.on_status(last);

    while last != ReadyState::Closed && state.changed().await.is_ok() {
        last = *state.borrow_and_update();
        observer.on_status(last);
    }
}
