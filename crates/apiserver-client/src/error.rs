//! API client errors

use thiserror::Error;

/// Errors that can occur when talking to the API server.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request could not be sent or the connection failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body stream broke off mid-read
    #[error("Stream error: {0}")]
    Stream(String),

    /// The server answered with a status outside 200-226
    #[error("invalid response code {code} for request url {url:?}: {body}")]
    Status {
        code: u16,
        url: String,
        body: String,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Reading local credentials or certificates failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid client configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientError {
    /// HTTP status code, for protocol errors.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ClientError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }
}
