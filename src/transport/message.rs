//! Inbound message classification
//!
//! The wire frame type alone decides what a message is: text frames are
//! transcript events, binary frames are audio. Payload content is never
//! inspected to reclassify a frame.

use serde::Deserialize;
use tokio_tungstenite::tungstenite::Message;

use crate::Result;

/// Who spoke a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    /// The local user
    Caller,
    /// The remote agent
    Agent,
}

impl Speaker {
    /// Map the wire `person` field to a speaker
    ///
    /// Only agent-side labels map to [`Speaker::Agent`]; anything else is the
    /// caller.
    #[must_use]
    pub fn from_person(person: &str) -> Self {
        let person = person.trim();
        if person.eq_ignore_ascii_case("agent") || person.eq_ignore_ascii_case("assistant") {
            Self::Agent
        } else {
            Self::Caller
        }
    }

    /// Display label
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Caller => "You",
            Self::Agent => "Agent",
        }
    }
}

/// A transcript line pushed by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEvent {
    pub sender: Speaker,
    pub transcript: String,
}

/// Raw PCM16 response audio, no header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub bytes: Vec<u8>,
}

/// A classified inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Text(TextEvent),
    Audio(AudioChunk),
}

/// Wire shape of a transcript frame
#[derive(Deserialize)]
struct TranscriptFrame {
    person: String,
    transcript: String,
}

/// Parse a text frame into a transcript event
///
/// # Errors
///
/// Returns error if the payload is not a `{ person, transcript }` object
pub fn parse_text_event(text: &str) -> Result<TextEvent> {
    let frame: TranscriptFrame = serde_json::from_str(text)?;
    Ok(TextEvent {
        sender: Speaker::from_person(&frame.person),
        transcript: frame.transcript,
    })
}

/// Classify a WebSocket message
///
/// Returns `None` for control frames (ping, pong, close).
#[must_use]
pub fn classify(message: Message) -> Option<Result<InboundMessage>> {
    match message {
        Message::Text(text) => Some(parse_text_event(text.as_str()).map(InboundMessage::Text)),
        Message::Binary(bytes) => Some(Ok(InboundMessage::Audio(AudioChunk {
            bytes: bytes.to_vec(),
        }))),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
    }
}
