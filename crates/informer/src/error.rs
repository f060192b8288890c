//! Informer error types.

use apiserver_client::ClientError;
use thiserror::Error;

/// Errors surfaced by watch streams, caches and cached API access.
#[derive(Debug, Error)]
pub enum InformerError {
    /// Transport or protocol failure from the API server
    #[error("API request failed: {0}")]
    Client(#[from] ClientError),

    /// A watch frame that is not a valid event (bad JSON or unknown type)
    #[error("Failed to decode watch event: {0}")]
    Decode(#[from] serde_json::Error),

    /// The watch was stopped by its owner
    #[error("Watch stopped")]
    Stopped,

    /// The watch already failed or was stopped and will produce nothing more
    #[error("Watch stream is closed")]
    Closed,

    #[error("Object {0} not found in cache")]
    NotFound(String),

    /// The cache a controller was driven by stopped applying events
    #[error("Cache stopped: {0}")]
    CacheStopped(String),
}

impl InformerError {
    /// `true` when the error only reports a caller-initiated stop.
    pub fn is_stopped(&self) -> bool {
        matches!(self, InformerError::Stopped)
    }
}
