//! Ephemeral credential endpoint
//!
//! Mints a short-lived realtime credential with the long-lived API key so
//! clients never see the key itself. The upstream JSON is relayed as-is.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use secrecy::ExposeSecret;
use serde::Serialize;

use super::ApiState;

/// Build session router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/session", get(mint_session))
        .with_state(state)
}

/// Body sent upstream to create a realtime session
#[derive(Debug, Serialize)]
pub struct SessionRequest<'a> {
    pub model: &'a str,
    pub voice: &'a str,
}

/// Create an ephemeral realtime session and relay the upstream response
async fn mint_session(State(state): State<Arc<ApiState>>) -> Result<Response, SessionError> {
    let api_key = state
        .api_key
        .as_ref()
        .ok_or(SessionError::NotConfigured("no realtime API key configured"))?;

    let upstream = state
        .client
        .post(&state.upstream_url)
        .bearer_auth(api_key.expose_secret())
        .json(&SessionRequest {
            model: &state.model,
            voice: &state.voice,
        })
        .send()
        .await
        .map_err(|e| SessionError::Upstream(e.to_string()))?;

    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let body = upstream
        .bytes()
        .await
        .map_err(|e| SessionError::Upstream(e.to_string()))?;

    if status.is_success() {
        tracing::debug!(model = %state.model, "minted realtime session");
    } else {
        tracing::warn!(status = %status, "upstream rejected session request");
    }

    Ok((status, [(header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// Credential endpoint errors
#[derive(Debug)]
pub enum SessionError {
    NotConfigured(&'static str),
    Upstream(String),
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::NotConfigured(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "not_configured",
                msg.to_string(),
            ),
            Self::Upstream(msg) => {
                tracing::error!(error = %msg, "failed to reach realtime sessions endpoint");
                (StatusCode::BAD_GATEWAY, "upstream_failed", msg)
            }
        };

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}
