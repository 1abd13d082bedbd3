//! WebSocket transport for PCM streaming
//!
//! One connection per session. Outbound audio is only written while the
//! socket is open; anything sent earlier or later is dropped, never queued.
//! There is no reconnection: once closed, a transport stays closed.

mod message;

use std::sync::Mutex;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

pub use message::{AudioChunk, InboundMessage, Speaker, TextEvent, classify, parse_text_event};

use crate::voice::Pcm16Buffer;

/// Control frame asking the server to finalize the utterance
pub const END_OF_UTTERANCE: &str = "end";

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
    /// Transport failed; always followed by `Closed`
    Error,
}

impl ReadyState {
    /// Status line shown to the user
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::Connecting => "Connecting...",
            Self::Open => "Connected",
            Self::Closing => "Disconnecting...",
            Self::Closed => "Not connected",
            Self::Error => "Connection error",
        }
    }
}

enum Outbound {
    Audio(Vec<u8>),
    Text(String),
    Close,
}

/// A single bidirectional WebSocket connection
pub struct SocketTransport {
    url: String,
    state: watch::Sender<ReadyState>,
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
    task: JoinHandle<()>,
}

impl SocketTransport {
    /// Begin connecting to `url`
    ///
    /// Returns immediately in [`ReadyState::Connecting`]; connection failures
    /// surface as [`ReadyState::Error`] followed by [`ReadyState::Closed`].
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn open(url: &str) -> Self {
        let (state, _) = watch::channel(ReadyState::Connecting);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_connection(
            url.to_string(),
            state.clone(),
            outbound_rx,
            inbound_tx,
        ));

        Self {
            url: url.to_string(),
            state,
            outbound,
            inbound: Mutex::new(Some(inbound_rx)),
            task,
        }
    }

    /// Endpoint this transport connects to
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current ready-state
    #[must_use]
    pub fn state(&self) -> ReadyState {
        *self.state.borrow()
    }

    /// Whether outbound writes are currently accepted
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ReadyState::Open
    }

    /// Follow ready-state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ReadyState> {
        self.state.subscribe()
    }

    /// Take the inbound message stream (available once)
    pub fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>> {
        self.inbound.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Send PCM16 audio as a binary frame
    ///
    /// No-op unless the socket is open. Returns whether the frame was queued.
    pub fn send(&self, pcm: &Pcm16Buffer) -> bool {
        if !self.is_open() {
            return false;
        }
        self.outbound.send(Outbound::Audio(pcm.to_le_bytes())).is_ok()
    }

    /// Send the end-of-utterance control frame
    ///
    /// No-op unless the socket is open.
    pub fn send_end(&self) -> bool {
        if !self.is_open() {
            return false;
        }
        self.outbound
            .send(Outbound::Text(END_OF_UTTERANCE.to_string()))
            .is_ok()
    }

    /// Close the connection (idempotent)
    pub fn close(&self) {
        let requested = self.state.send_if_modified(|state| match state {
            ReadyState::Connecting | ReadyState::Open => {
                *state = ReadyState::Closing;
                true
            }
            _ => false,
        });

        if requested {
            tracing::debug!(url = %self.url, "closing socket");
            let _ = self.outbound.send(Outbound::Close);
        }
    }

    /// Wait until the connection reaches [`ReadyState::Closed`]
    pub async fn closed(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == ReadyState::Closed).await;
    }

    /// Close and wait up to `timeout` for the connection to finish
    pub async fn close_and_wait(&self, timeout: Duration) {
        self.close();
        if tokio::time::timeout(timeout, self.closed()).await.is_err() {
            tracing::warn!(url = %self.url, "socket did not close in time, aborting");
            self.task.abort();
            self.state.send_replace(ReadyState::Closed);
        }
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Connection task: connects, then multiplexes writes and reads until closed
async fn run_connection(
    url: String,
    state: watch::Sender<ReadyState>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    inbound: mpsc::UnboundedSender<InboundMessage>,
) {
    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            tracing::error!(url = %url, error = %e, "websocket connection failed");
            publish_ending(&state, true);
            return;
        }
    };

    // close() may have run while the handshake was in flight
    let opened = state.send_if_modified(|s| {
        if *s == ReadyState::Connecting {
            *s = ReadyState::Open;
            true
        } else {
            false
        }
    });

    let (mut sink, mut stream) = ws.split();

    if !opened {
        let _ = sink.send(Message::Close(None)).await;
        publish_ending(&state, false);
        return;
    }

    tracing::info!(url = %url, "websocket connection opened");

    let mut failed = false;
    loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(Outbound::Audio(bytes)) => {
                    if let Err(e) = sink.send(Message::binary(bytes)).await {
                        tracing::error!(error = %e, "websocket send failed");
                        failed = true;
                        break;
                    }
                }
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(Message::text(text)).await {
                        tracing::error!(error = %e, "websocket send failed");
                        failed = true;
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(?frame, "server closed websocket");
                    break;
                }
                Some(Ok(message)) => match classify(message) {
                    Some(Ok(classified)) => {
                        let _ = inbound.send(classified);
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "ignoring malformed text message");
                    }
                    None => {}
                },
                Some(Err(e)) => {
                    tracing::error!(error = %e, "websocket error");
                    failed = true;
                    break;
                }
                None => break,
            },
        }
    }

    publish_ending(&state, failed);
    tracing::info!(url = %url, "websocket connection closed");
}

/// States a connection passes through on its way down
///
/// A clean shutdown, whether requested locally or by the server, goes through
/// `Closing`; a failure goes through `Error`. Both end in `Closed`.
const fn ending_states(failed: bool) -> &'static [ReadyState] {
    if failed {
        &[ReadyState::Error, ReadyState::Closed]
    } else {
        &[ReadyState::Closing, ReadyState::Closed]
    }
}

/// Publish the ending sequence, skipping a state already current
fn publish_ending(state: &watch::Sender<ReadyState>, failed: bool) {
    for &next in ending_states(failed) {
        state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_endpoint_closes() {
        // Port 9 (discard) is almost never listening on localhost
        let transport = SocketTransport::open("ws://127.0.0.1:9/audio");
        assert!(matches!(
            transport.state(),
            ReadyState::Connecting | ReadyState::Error | ReadyState::Closed
        ));

        tokio::time::timeout(Duration::from_secs(5), transport.closed())
            .await
            .expect("transport should give up");

        assert_eq!(transport.state(), ReadyState::Closed);
        assert!(!transport.send(&Pcm16Buffer::from_samples(vec![1, 2, 3])));
        assert!(!transport.send_end());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let transport = SocketTransport::open("ws://127.0.0.1:9/audio");
        transport.close();
        transport.close();
        tokio::time::timeout(Duration::from_secs(5), transport.closed())
            .await
            .expect("transport should close");
        transport.close();
        assert_eq!(transport.state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn test_inbound_taken_once() {
        let transport = SocketTransport::open("ws://127.0.0.1:9/audio");
        assert!(transport.take_inbound().is_some());
        assert!(transport.take_inbound().is_none());
    }

    #[test]
    fn test_clean_ending_passes_through_closing() {
        assert_eq!(
            ending_states(false),
            &[ReadyState::Closing, ReadyState::Closed]
        );
        assert_eq!(ending_states(true), &[ReadyState::Error, ReadyState::Closed]);
    }

    #[test]
    fn test_publish_ending_skips_current_state() {
        let (state, observed) = watch::channel(ReadyState::Closing);
        publish_ending(&state, false);
        assert_eq!(*observed.borrow(), ReadyState::Closed);
    }

    #[test]
    fn test_state_descriptions() {
        assert_eq!(ReadyState::Open.describe(), "Connected");
        assert_eq!(ReadyState::Closed.describe(), "Not connected");
    }
}
