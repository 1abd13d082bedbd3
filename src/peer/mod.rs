//! Peer session with a realtime media API
//!
//! Alternate to the socket path: audio flows over a peer connection with an
//! Opus track each way, and realtime events flow over a data channel. The
//! remote side delivers a continuous stream, so no WAV framing is involved.

mod negotiation;
mod rtc;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

pub use negotiation::{
    DEFAULT_MODEL, DEFAULT_REALTIME_URL, DEFAULT_SESSION_URL, EphemeralCredential, Negotiator,
};
pub use rtc::{PEER_SAMPLE_RATE, RtcConnector};

use crate::Result;
use crate::voice::{CaptureHandle, FrameReceiver, FrameSource, PlaybackSink, RemoteAudio};

/// Label of the realtime event data channel
pub const EVENT_CHANNEL: &str = "oai-events";

/// Called once per inbound remote audio track
pub type RemoteAudioHandler = Box<dyn Fn(RemoteAudio) + Send + Sync>;

/// One peer connection
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Send local microphone frames as an outbound audio track
    async fn add_microphone(&self, frames: FrameReceiver, sample_rate: u32) -> Result<()>;

    /// Create a bidirectional data channel; inbound text goes to `events`
    async fn open_event_channel(
        &self,
        label: &str,
        events: mpsc::UnboundedSender<String>,
    ) -> Result<()>;

    /// Send a text event on the data channel
    async fn send_event(&self, event: &str) -> Result<()>;

    /// Register the handler for inbound remote audio
    fn on_remote_audio(&self, handler: RemoteAudioHandler);

    /// Create the local offer and set it as the local description
    async fn create_offer(&self) -> Result<String>;

    /// Apply the remote answer
    async fn apply_answer(&self, sdp: String) -> Result<()>;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// Creates peer connections
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Create a fresh, unnegotiated connection
    async fn connect(&self) -> Result<Box<dyn PeerConnection>>;
}

struct PeerSession {
    connection: Box<dyn PeerConnection>,
    credential: EphemeralCredential,
    capture: CaptureHandle,
    events: JoinHandle<()>,
}

/// Starts and stops peer sessions
pub struct PeerSessionController {
    negotiator: Negotiator,
    connector: Arc<dyn PeerConnector>,
    source: Arc<dyn FrameSource>,
    sink: Arc<dyn PlaybackSink>,
    current: Mutex<Option<PeerSession>>,
}

impl PeerSessionController {
    /// Create an idle controller
    ///
    /// `source` should produce frames at [`PEER_SAMPLE_RATE`].
    #[must_use]
    pub fn new(
        negotiator: Negotiator,
        connector: Arc<dyn PeerConnector>,
        source: Arc<dyn FrameSource>,
        sink: Arc<dyn PlaybackSink>,
    ) -> Self {
        Self {
            negotiator,
            connector,
            source,
            sink,
            current: Mutex::new(None),
        }
    }

    /// Negotiate and start a peer session
    ///
    /// Replaces any live peer session.
    ///
    /// # Errors
    ///
    /// Returns error if the credential cannot be fetched, the microphone
    /// cannot be opened, or negotiation fails. The connection is closed and
    /// never established in every failure case.
    pub async fn start(&self) -> Result<()> {
        let mut current = self.current.lock().await;
        if let Some(old) = current.take() {
            tracing::info!("replacing active peer session");
            close_session(old).await;
        }

        let credential = self.negotiator.fetch_credential().await?;
        let connection = self.connector.connect().await?;

        match self.negotiate(connection.as_ref(), &credential).await {
            Ok((capture, events)) => {
                tracing::info!(model = self.negotiator.model(), "peer session established");
                *current = Some(PeerSession {
                    connection,
                    credential,
                    capture,
                    events,
                });
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "peer session setup failed");
                if let Err(close_err) = connection.close().await {
                    tracing::warn!(error = %close_err, "failed to close peer connection");
                }
                Err(e)
            }
        }
    }

    async fn negotiate(
        &self,
        connection: &dyn PeerConnection,
        credential: &EphemeralCredential,
    ) -> Result<(CaptureHandle, JoinHandle<()>)> {
        let sink = Arc::clone(&self.sink);
        connection.on_remote_audio(Box::new(move |stream| {
            tracing::info!(sample_rate = stream.sample_rate(), "remote audio track arrived");
            sink.attach_stream(stream);
        }));

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let capture = self.source.start(frames_tx).await?;
        connection
            .add_microphone(frames_rx, self.source.sample_rate())
            .await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        connection.open_event_channel(EVENT_CHANNEL, events_tx).await?;
        let events = tokio::spawn(log_events(events_rx));

        let offer = connection.create_offer().await?;
        let answer = match self.negotiator.exchange(credential, offer).await {
            Ok(answer) => answer,
            Err(e) => {
                events.abort();
                return Err(e);
            }
        };

        if let Err(e) = connection.apply_answer(answer).await {
            events.abort();
            return Err(e);
        }

        Ok((capture, events))
    }

    /// Send a realtime event on the live session's data channel
    ///
    /// Returns `Ok(false)` if no session is live.
    ///
    /// # Errors
    ///
    /// Returns error if the event cannot be serialized or sent
    pub async fn send_event(&self, event: &serde_json::Value) -> Result<bool> {
        let current = self.current.lock().await;
        let Some(session) = current.as_ref() else {
            return Ok(false);
        };
        session
            .connection
            .send_event(&serde_json::to_string(event)?)
            .await?;
        Ok(true)
    }

    /// Close the live peer session (idempotent)
    pub async fn stop(&self) {
        if let Some(session) = self.current.lock().await.take() {
            close_session(session).await;
            tracing::info!("peer session stopped");
        }
    }

    /// Whether a peer session is live
    pub async fn is_active(&self) -> bool {
        self.current.lock().await.is_some()
    }
}

async fn close_session(session: PeerSession) {
    let PeerSession {
        connection,
        credential,
        mut capture,
        events,
    } = session;

    tracing::debug!(?credential, "releasing peer session");
    capture.stop();
    events.abort();
    if let Err(e) = connection.close().await {
        tracing::warn!(error = %e, "failed to close peer connection");
    }
}

/// Parse a realtime event; `None` if it is not JSON
#[must_use]
pub fn parse_event(text: &str) -> Option<serde_json::Value> {
    match serde_json::from_str(text) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse realtime event");
            None
        }
    }
}

async fn log_events(mut events: mpsc::UnboundedReceiver<String>) {
    while let Some(text) = events.recv().await {
        if let Some(event) = parse_event(&text) {
            let kind = event
                .get("type")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown");
            tracing::debug!(kind, %event, "received realtime event");
        }
    }
}
