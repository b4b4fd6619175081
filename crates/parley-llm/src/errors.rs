//! Model-layer error types.

use thiserror::Error;

/// Errors surfaced by model backends.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Transport-level HTTP failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response from the provider API.
    #[error("api error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Provider-supplied error message, or the raw body.
        message: String,
    },

    /// Malformed JSON in a response or stream event.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Stream-level failure (disconnect, malformed SSE frame).
    #[error("stream error: {0}")]
    Stream(String),

    /// The structured completion returned no usable content.
    #[error("empty completion from model")]
    EmptyCompletion,

    /// Configuration problem (bad API key header, bad base URL).
    #[error("model configuration error: {0}")]
    Config(String),
}

/// Convenience result alias for model operations.
pub type ModelResult<T> = std::result::Result<T, ModelError>;
