//! beacon-stream - live microphone streaming for realtime voice agents
//!
//! Two alternate paths carry microphone audio to a remote agent and play its
//! response back:
//! - a WebSocket carrying raw PCM16 frames, with transcripts as text frames
//!   and response audio as binary frames wrapped into WAV for playback
//! - a peer connection negotiated with a realtime media API, with audio on
//!   Opus tracks and events on a data channel
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   frames   ┌─────────┐  PCM16  ┌─────────────────┐
//! │ FrameSource  │──────────▶│ Session │───────▶│ SocketTransport │
//! │ (cpal thread)│            │         │◀───────│                 │
//! └──────────────┘            └────┬────┘ inbound └─────────────────┘
//!                                  │
//!                     text ┌───────┴──────┐ audio
//!                          ▼              ▼
//!                  SessionObserver   wav::wrap → PlaybackSink
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod peer;
pub mod session;
pub mod transport;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use peer::{PeerConnection, PeerConnector, PeerSessionController};
pub use session::{SessionController, SessionObserver, SessionSettings};
pub use transport::{InboundMessage, ReadyState, SocketTransport};
