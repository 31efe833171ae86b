//! Client error type.

use thiserror::Error;

/// Client error.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Server refused to resume: {0}")]
    ResumeRejected(String),
    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("Server did not return a session id")]
    MissingSessionId,
    #[error("Stream ended before the response arrived")]
    StreamClosed,
    #[error("Event stream error: {0}")]
    Sse(String),
    #[error("Invalid message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Not connected")]
    NotConnected,
    #[error("Authorization failed: {0}")]
    Authorization(String),
    #[error("Authorization required: {0}")]
    RedirectRequired(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("No data directory on this platform")]
    NoDataDir,
}
