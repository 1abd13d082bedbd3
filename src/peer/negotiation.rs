//! Credential fetch and SDP offer/answer exchange

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::{Error, Result};

/// Default realtime negotiation endpoint
pub const DEFAULT_REALTIME_URL: &str = "https://api.openai.com/v1/realtime";

/// Default realtime model
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";

/// Default local credential endpoint
pub const DEFAULT_SESSION_URL: &str = "http://localhost:8080/session";

/// Short-lived bearer credential for one negotiation
#[derive(Clone)]
pub struct EphemeralCredential(SecretString);

impl EphemeralCredential {
    /// Wrap a credential value
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for EphemeralCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EphemeralCredential([REDACTED])")
    }
}

#[derive(Deserialize)]
struct SessionResponse {
    client_secret: ClientSecret,
}

#[derive(Deserialize)]
struct ClientSecret {
    value: String,
}

/// HTTP side of peer negotiation
#[derive(Debug, Clone)]
pub struct Negotiator {
    client: reqwest::Client,
    session_url: String,
    realtime_url: String,
    model: String,
}

impl Negotiator {
    /// Create a negotiator
    #[must_use]
    pub fn new(
        session_url: impl Into<String>,
        realtime_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            session_url: session_url.into(),
            realtime_url: realtime_url.into(),
            model: model.into(),
        }
    }

    /// Model requested during the exchange
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Fetch an ephemeral credential from the local endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the request fails, the endpoint answers non-2xx, or
    /// the body lacks `client_secret.value`
    pub async fn fetch_credential(&self) -> Result<EphemeralCredential> {
        let response = self.client.get(&self.session_url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Negotiation(format!(
                "credential endpoint returned {status}: {body}"
            )));
        }

        let session: SessionResponse = response.json().await?;
        tracing::debug!(url = %self.session_url, "fetched ephemeral credential");
        Ok(EphemeralCredential::new(session.client_secret.value))
    }

    /// Post the local offer and return the remote answer
    ///
    /// # Errors
    ///
    /// Returns [`Error::Negotiation`] on any non-2xx response
    pub async fn exchange(
        &self,
        credential: &EphemeralCredential,
        offer: String,
    ) -> Result<String> {
        let response = self
            .client
            .post(&self.realtime_url)
            .query(&[("model", self.model.as_str())])
            .bearer_auth(credential.expose())
            .header(reqwest::header::CONTENT_TYPE, "application/sdp")
            .body(offer)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, "SDP negotiation rejected");
            return Err(Error::Negotiation(format!(
                "negotiation endpoint returned {status}: {body}"
            )));
        }

        let answer = response.text().await?;
        tracing::debug!(bytes = answer.len(), "received SDP answer");
        Ok(answer)
    }
}

impl Default for Negotiator {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_URL, DEFAULT_REALTIME_URL, DEFAULT_MODEL)
    }
}
