//! Transcript and status observers

use crate::transport::{ReadyState, TextEvent};

/// Receives what a session has to show the user
///
/// Called from the session's background tasks; implementations must not
/// block.
pub trait SessionObserver: Send + Sync {
    /// A transcript line arrived from the server
    fn on_transcript(&self, event: &TextEvent);

    /// The transport changed ready-state
    fn on_status(&self, state: ReadyState);
}

/// Observer that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl SessionObserver for LogObserver {
    fn on_transcript(&self, event: &TextEvent) {
        tracing::info!(
            speaker = event.sender.label(),
            transcript = %event.transcript,
            "transcript"
        );
    }

    fn on_status(&self, state: ReadyState) {
        tracing::info!(status = state.describe(), "connection status");
    }
}
