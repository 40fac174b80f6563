//! Error types for the PhysioGold domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use thiserror::Error;

/// Failures of the remote generation or discovery API.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// Failures while turning an uploaded document into text.
#[derive(Debug, Clone, Error)]
pub enum DocumentError {
    #[error("Unsupported document type: {0}")]
    Unsupported(String),

    #[error("Failed to extract text from {name}: {reason}")]
    ExtractionFailed { name: String, reason: String },
}

/// Failures of one request/response cycle.
#[derive(Debug, Clone, Error)]
pub enum TurnError {
    #[error("Please enter an API key in the sidebar to start.")]
    MissingCredential,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("A reply is still being generated for this session")]
    Busy,

    #[error("Error: {0}")]
    Generation(#[from] ProviderError),
}
