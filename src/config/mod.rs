//! Configuration management for beacon-stream

pub mod file;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use crate::api::{DEFAULT_PORT, DEFAULT_UPSTREAM_URL, DEFAULT_VOICE};
use crate::peer::{DEFAULT_MODEL, DEFAULT_REALTIME_URL, DEFAULT_SESSION_URL, PEER_SAMPLE_RATE};
use crate::session::{DEFAULT_GRACE, DEFAULT_SOCKET_URL, SessionSettings};
use crate::voice::{
    ChunkedFrameSource, DEFAULT_BLOCK_SIZE, FrameSource, PcmFrameSource, SAMPLE_RATE,
};
use crate::{Error, Result};

use file::StreamConfigFile;

/// Default chunk duration for the chunked strategy
pub const DEFAULT_CHUNK_MS: u32 = 1000;

/// beacon-stream configuration
#[derive(Debug)]
pub struct Config {
    /// Socket streaming
    pub socket: SocketConfig,

    /// Microphone capture
    pub capture: CaptureConfig,

    /// Peer session
    pub peer: PeerConfig,

    /// Credential endpoint server
    pub server: ServerConfig,

    /// Long-lived realtime API key (server side only)
    pub api_key: Option<SecretString>,
}

/// Socket streaming configuration
#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub url: String,
    pub grace: Duration,
}

/// How microphone audio is framed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureStrategy {
    /// One frame per device callback
    #[default]
    Pcm,
    /// One frame per fixed interval
    Chunked,
}

impl FromStr for CaptureStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pcm" | "worklet" => Ok(Self::Pcm),
            "chunked" | "recorder" => Ok(Self::Chunked),
            other => Err(Error::Config(format!("unknown capture strategy: {other}"))),
        }
    }
}

/// Microphone capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub strategy: CaptureStrategy,
    pub block_size: u32,
    pub chunk_ms: u32,
    pub skip_silent: bool,
    pub sample_rate: u32,
}

impl CaptureConfig {
    /// Build the frame source for socket streaming
    #[must_use]
    pub fn frame_source(&self) -> Arc<dyn FrameSource> {
        match self.strategy {
            CaptureStrategy::Pcm => {
                Arc::new(PcmFrameSource::new(self.sample_rate, self.block_size))
            }
            CaptureStrategy::Chunked => Arc::new(ChunkedFrameSource::new(
                self.sample_rate,
                self.chunk_ms,
                self.skip_silent,
            )),
        }
    }

    /// Build the frame source for peer sessions (always 48 kHz)
    #[must_use]
    pub fn peer_frame_source(&self) -> Arc<dyn FrameSource> {
        Arc::new(PcmFrameSource::new(PEER_SAMPLE_RATE, self.block_size))
    }
}

/// Peer session configuration
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub session_url: String,
    pub realtime_url: String,
    pub model: String,
    pub ice_servers: Vec<String>,
}

/// Credential endpoint server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub upstream_url: String,
    pub voice: String,
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if a URL or capture strategy is invalid
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Layer environment lookups over a parsed config file
    ///
    /// # Errors
    ///
    /// Returns error if a URL or capture strategy is invalid
    pub fn from_sources<F>(fc: StreamConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let socket = SocketConfig {
            url: validate_url(
                "socket url",
                env("BEACON_STREAM_URL")
                    .or(fc.socket.url)
                    .unwrap_or_else(|| DEFAULT_SOCKET_URL.to_string()),
                &["ws", "wss"],
            )?,
            grace: env("BEACON_STREAM_GRACE_MS")
                .and_then(|s| s.parse().ok())
                .or(fc.socket.grace_ms)
                .map_or(DEFAULT_GRACE, Duration::from_millis),
        };

        let strategy = match env("BEACON_CAPTURE_STRATEGY").or(fc.capture.strategy) {
            Some(s) => s.parse()?,
            None => CaptureStrategy::default(),
        };

        let capture = CaptureConfig {
            strategy,
            block_size: fc.capture.block_size.unwrap_or(DEFAULT_BLOCK_SIZE),
            chunk_ms: fc.capture.chunk_ms.unwrap_or(DEFAULT_CHUNK_MS),
            skip_silent: fc.capture.skip_silent.unwrap_or(true),
            sample_rate: fc.capture.sample_rate.unwrap_or(SAMPLE_RATE),
        };

        let peer = PeerConfig {
            session_url: validate_url(
                "session url",
                env("BEACON_SESSION_URL")
                    .or(fc.peer.session_url)
                    .unwrap_or_else(|| DEFAULT_SESSION_URL.to_string()),
                &["http", "https"],
            )?,
            realtime_url: validate_url(
                "realtime url",
                env("BEACON_REALTIME_URL")
                    .or(fc.peer.realtime_url)
                    .unwrap_or_else(|| DEFAULT_REALTIME_URL.to_string()),
                &["http", "https"],
            )?,
            model: env("BEACON_REALTIME_MODEL")
                .or(fc.peer.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            ice_servers: fc.peer.ice_servers.unwrap_or_default(),
        };

        let server = ServerConfig {
            port: env("BEACON_PORT")
                .and_then(|s| s.parse().ok())
                .or(fc.server.port)
                .unwrap_or(DEFAULT_PORT),
            upstream_url: validate_url(
                "upstream url",
                fc.server
                    .upstream_url
                    .unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string()),
                &["http", "https"],
            )?,
            voice: env("BEACON_REALTIME_VOICE")
                .or(fc.server.voice)
                .unwrap_or_else(|| DEFAULT_VOICE.to_string()),
        };

        let api_key = env("OPENAI_API_KEY")
            .or(fc.api_keys.openai)
            .filter(|key| !key.is_empty())
            .map(SecretString::from);

        Ok(Self {
            socket,
            capture,
            peer,
            server,
            api_key,
        })
    }

    /// Session parameters for the socket path
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            url: self.socket.url.clone(),
            grace: self.socket.grace,
        }
    }
}

fn validate_url(field: &str, value: String, schemes: &[&str]) -> Result<String> {
    let parsed = url::Url::parse(&value)
        .map_err(|e| Error::Config(format!("invalid {field} {value:?}: {e}")))?;

    if !schemes.contains(&parsed.scheme()) {
        return Err(Error::Config(format!(
            "invalid {field} {value:?}: expected scheme {}",
            schemes.join(" or ")
        )));
    }

    Ok(value)
}
