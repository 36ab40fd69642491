//! Client error types.

use thiserror::Error;

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors returned by the client handle.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The engine rejected the request
    #[error(transparent)]
    Channel(#[from] webchannel_core::Error),

    /// The HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    /// A message could not be serialized
    #[error("failed to encode message: {0}")]
    Json(#[from] serde_json::Error),

    /// The channel task has finished
    #[error("channel is closed")]
    Disconnected,
}
