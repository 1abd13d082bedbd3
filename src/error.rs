//! Error types for beacon-stream

use thiserror::Error;

/// Result type alias for beacon-stream operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while streaming
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone access denied or no usable input device
    #[error("microphone access denied: {0}")]
    Permission(String),

    /// Socket transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Offer/answer exchange rejected by the remote endpoint
    #[error("negotiation error: {0}")]
    Negotiation(String),

    /// Playback could not be started
    #[error("playback error: {0}")]
    Playback(String),

    /// Audio codec error (Opus, WAV)
    #[error("codec error: {0}")]
    Codec(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Peer connection error
    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),
}
