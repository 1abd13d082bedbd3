//! HTTP API server for the credential endpoint

pub mod health;
pub mod session;

use std::sync::Arc;

use axum::Router;
use secrecy::SecretString;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;

/// Default upstream realtime sessions endpoint
pub const DEFAULT_UPSTREAM_URL: &str = "https://api.openai.com/v1/realtime/sessions";

/// Default voice requested for minted sessions
pub const DEFAULT_VOICE: &str = "verse";

/// Default listen port
pub const DEFAULT_PORT: u16 = 8080;

/// Shared state for API handlers
pub struct ApiState {
    pub client: reqwest::Client,
    pub api_key: Option<SecretString>,
    pub upstream_url: String,
    pub model: String,
    pub voice: String,
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

/// Builder for [`ApiServer`]
pub struct ApiServerBuilder {
    api_key: Option<SecretString>,
    upstream_url: String,
    model: String,
    voice: String,
    port: u16,
}

impl ApiServerBuilder {
    /// Start from defaults with no API key
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_key: None,
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            model: crate::peer::DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            port: DEFAULT_PORT,
        }
    }

    /// Set the long-lived API key used to mint credentials
    #[must_use]
    pub fn api_key(mut self, key: Option<SecretString>) -> Self {
        self.api_key = key;
        self
    }

    /// Set the upstream sessions URL
    #[must_use]
    pub fn upstream_url(mut self, url: impl Into<String>) -> Self {
        self.upstream_url = url.into();
        self
    }

    /// Set the realtime model
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the session voice
    #[must_use]
    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    /// Set the listen port
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        if self.api_key.is_none() {
            tracing::warn!("no realtime API key configured, /session will return 503");
        }

        ApiServer {
            state: Arc::new(ApiState {
                client: reqwest::Client::new(),
                api_key: self.api_key,
                upstream_url: self.upstream_url,
                model: self.model,
                voice: self.voice,
            }),
            port: self.port,
        }
    }
}

impl Default for ApiServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiServer {
    /// Build the router with all routes and layers
    pub fn router(&self) -> Router {
        let router = Router::new()
            .merge(session::router(self.state.clone()))
            .merge(health::router());

        // CORS layer for cross-origin requests from browser clients
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if the listener cannot bind or the server fails
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }
}
