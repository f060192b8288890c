//! Controller-specific error types.

use apiserver_client::ClientError;
use thiserror::Error;

/// Errors that can occur in the Endpoints Watch Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// API server client error
    #[error("API server error: {0}")]
    Client(#[from] ClientError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
