//! Client configuration.

use crate::error::ClientError;
use crate::token::{FileToken, StaticToken, TokenProvider};
use std::env;
use std::sync::Arc;
use std::time::Duration;

/// Service account token mounted into every pod.
pub const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// CA bundle for the in-cluster API server certificate.
pub const SERVICE_ACCOUNT_CA_CERT: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Connection settings for [`HttpClient`](crate::HttpClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API server base URL (e.g., "https://10.96.0.1:443")
    pub server_url: String,

    pub token: Option<Arc<dyn TokenProvider>>,

    /// Extra root certificate (PEM) trusted for the API server
    pub ca_pem: Option<Vec<u8>>,

    /// Connect timeout. There is no overall request timeout because watch
    /// responses stay open indefinitely.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into().trim_end_matches('/').to_string(),
            token: None,
            ca_pem: None,
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Configuration for a client running inside a pod.
    ///
    /// Requires `KUBERNETES_SERVICE_HOST` and `KUBERNETES_SERVICE_PORT`, and
    /// the mounted service account token and CA bundle.
    pub fn in_cluster() -> Result<Self, ClientError> {
        let host = env::var("KUBERNETES_SERVICE_HOST").unwrap_or_default();
        let port = env::var("KUBERNETES_SERVICE_PORT").unwrap_or_default();
        if host.is_empty() || port.is_empty() {
            return Err(ClientError::InvalidConfig(
                "unable to load in-cluster configuration, KUBERNETES_SERVICE_HOST and KUBERNETES_SERVICE_PORT must be defined".to_string(),
            ));
        }

        let token = FileToken::new(SERVICE_ACCOUNT_TOKEN)?;
        let ca = std::fs::read(SERVICE_ACCOUNT_CA_CERT)?;

        // IPv6 hosts need brackets in the authority
        let authority = if host.contains(':') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };

        Ok(Self::new(format!("https://{authority}"))
            .with_token(Arc::new(token))
            .with_ca_pem(ca))
    }

    #[must_use]
    pub fn with_token(mut self, token: Arc<dyn TokenProvider>) -> Self {
        self.token = Some(token);
        self
    }

    #[must_use]
    pub fn with_bearer_token(self, token: impl Into<String>) -> Self {
        self.with_token(Arc::new(StaticToken::new(token)))
    }

    #[must_use]
    pub fn with_ca_pem(mut self, pem: Vec<u8>) -> Self {
        self.ca_pem = Some(pem);
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let config = ClientConfig::new("https://api.example:6443/");
        assert_eq!(config.server_url, "https://api.example:6443");
    }

    #[test]
    fn test_bearer_token() {
        let config = ClientConfig::new("https://api.example").with_bearer_token("abc");
        let token = config.token.and_then(|t| t.token());
        assert_eq!(token.as_deref(), Some("abc"));
    }
}
