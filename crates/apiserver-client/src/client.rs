//! HTTP transport for API requests.
//!
//! Adds authentication and content negotiation to every request and turns
//! non-success status codes into [`ClientError::Status`].

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::request::ResourceRequest;
use crate::token::TokenProvider;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Certificate, Client, Response};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Authenticated HTTP client bound to one API server.
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: Option<Arc<dyn TokenProvider>>,
}

impl HttpClient {
    /// Create a new client from configuration
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let mut builder = Client::builder().connect_timeout(config.connect_timeout);
        if let Some(pem) = &config.ca_pem {
            builder = builder.add_root_certificate(Certificate::from_pem(pem)?);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.server_url,
            token: config.token,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends a request and checks the response status.
    ///
    /// Any status outside 200-226 is returned as a protocol error carrying the
    /// response body.
    pub async fn send(&self, request: ResourceRequest) -> Result<Response, ClientError> {
        let url = format!("{}{}", self.base_url, request.url());
        debug!("{} {}", request.verb, url);

        let mut builder = self
            .client
            .request(request.verb.clone(), &url)
            .header(ACCEPT, "application/json");
        if let Some(token) = self.token.as_ref().and_then(|t| t.token()) {
            builder = builder.bearer_auth(token);
        }
        if let Some(content_type) = request.content_type {
            builder = builder.header(CONTENT_TYPE, content_type.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;

        let code = response.status().as_u16();
        if !(200..=226).contains(&code) {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status { code, url, body });
        }

        Ok(response)
    }

    /// Sends a request and decodes the JSON response, returning the status
    /// code alongside the value.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ResourceRequest) -> Result<(T, u16), ClientError> {
        let response = self.send(request).await?;
        let code = response.status().as_u16();
        let body = response.bytes().await?;
        let value = serde_json::from_slice(&body)?;
        Ok((value, code))
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.token.is_some())
            .finish_non_exhaustive()
    }
}
