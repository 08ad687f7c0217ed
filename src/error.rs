//! Error types for the NoFall engine

use thiserror::Error;

/// Errors surfaced by the monitoring engine.
///
/// URL validation fails synchronously on the calling path; everything
/// else is captured into the relevant state snapshot and delivered to
/// observers rather than thrown across component boundaries.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid endpoint URL: {0}")]
    UrlValidation(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Maximum reconnection attempts reached")]
    MaxReconnectAttempts,

    #[error("Invalid message format: {0}")]
    MessageFormat(String),

    #[error("Failed to initialize {resource}: {reason}")]
    ResourceInit {
        resource: &'static str,
        reason: String,
    },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
