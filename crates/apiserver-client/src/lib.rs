//! API Server Client
//!
//! A small client for the REST and watch endpoints of a Kubernetes-style
//! API server. It covers what the informer needs and little more: typed
//! get/list/create/patch/apply/delete, and watch requests whose response body
//! is handed back as a raw byte stream for the caller to decode.
//!
//! # Example
//!
//! ```no_run
//! use apiserver_client::{Api, ClientConfig, HttpClient, ObjectApi};
//! use resources::{ConfigMap, ListOptions};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(HttpClient::new(ClientConfig::in_cluster()?)?);
//! let config_maps: Api<ConfigMap> = Api::new(client);
//!
//! let list = config_maps.list(Some("default"), &ListOptions::default()).await?;
//! println!("{} config maps at version {:?}", list.items.len(), list.resource_version());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod request;
pub mod token;
#[path = "trait.rs"]
pub mod api_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use api::Api;
pub use api_trait::{ByteStream, ObjectApi};
pub use client::HttpClient;
pub use config::ClientConfig;
pub use error::ClientError;
pub use request::{ContentType, ResourceRequest};
pub use token::{FileToken, StaticToken, TokenProvider};
#[cfg(feature = "test-util")]
pub use mock::{LiveWatch, MockApi, WatchEnd, WatchScript};
