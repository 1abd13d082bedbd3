//! TOML configuration file loading
//!
//! Supports `~/.config/omni/beacon-stream/config.toml` as a persistent config
//! source. All fields are optional; the file is a partial overlay on top of
//! defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct StreamConfigFile {
    /// Socket streaming configuration
    #[serde(default)]
    pub socket: SocketFileConfig,

    /// Microphone capture configuration
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Peer session configuration
    #[serde(default)]
    pub peer: PeerFileConfig,

    /// Credential endpoint server configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Socket streaming configuration
#[derive(Debug, Default, Deserialize)]
pub struct SocketFileConfig {
    /// WebSocket endpoint (e.g. "ws://localhost:8080/audio")
    pub url: Option<String>,

    /// Delay before closing the socket after stop, in milliseconds
    pub grace_ms: Option<u64>,
}

/// Microphone capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    /// "pcm" or "chunked"
    pub strategy: Option<String>,

    /// Samples per frame for the PCM strategy
    pub block_size: Option<u32>,

    /// Chunk duration for the chunked strategy
    pub chunk_ms: Option<u32>,

    /// Drop all-zero chunks (chunked strategy only)
    pub skip_silent: Option<bool>,

    /// Capture sample rate for socket streaming
    pub sample_rate: Option<u32>,
}

/// Peer session configuration
#[derive(Debug, Default, Deserialize)]
pub struct PeerFileConfig {
    /// Local credential endpoint
    pub session_url: Option<String>,

    /// Realtime negotiation endpoint
    pub realtime_url: Option<String>,

    /// Realtime model identifier
    pub model: Option<String>,

    /// STUN/TURN server URLs
    pub ice_servers: Option<Vec<String>>,
}

/// Credential endpoint server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Listen port
    pub port: Option<u16>,

    /// Upstream realtime sessions URL
    pub upstream_url: Option<String>,

    /// Voice requested for minted sessions
    pub voice: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `StreamConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> StreamConfigFile {
    let Some(path) = config_file_path() else {
        return StreamConfigFile::default();
    };

    load_config_file_from(&path)
}

/// Load a TOML config file from `path`
///
/// Returns `StreamConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file_from(path: &Path) -> StreamConfigFile {
    if !path.exists() {
        return StreamConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                StreamConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            StreamConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/omni/beacon-stream/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("beacon-stream")
            .join("config.toml")
    })
}
