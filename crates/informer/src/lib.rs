//! Informer
//!
//! Keeps a local, continuously updated mirror of an API server collection and
//! drives reconciliation from it:
//!
//! - [`WatchStream`]: decodes a watch body into typed events and resumes from
//!   the last resource version when the server ends the watch
//! - [`ResourceCache`]: list + watch mirror with ordered fan-out to listeners
//! - [`FilteredView`]: namespace/label filtered event stream for one consumer
//! - [`CachedApi`]: reads from the cache, writes through to the API server
//! - [`WorkQueue`]: deduplicating, rate-limited queue of keys
//! - [`Controller`]: runs a [`Reconciler`] for every key the cache reports
//!
//! # Example
//!
//! ```no_run
//! use apiserver_client::{Api, ClientConfig, HttpClient};
//! use informer::{Controller, ControllerConfig, FnReconciler, ResourceCache};
//! use resources::{ConfigMap, ListOptions, Resource};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(HttpClient::new(ClientConfig::in_cluster()?)?);
//! let api = Arc::new(Api::<ConfigMap>::new(client));
//!
//! let cache = Arc::new(ResourceCache::new(api, Some("default"), ListOptions::default()).await?);
//! let reconciler = Arc::new(FnReconciler::new(|cm: ConfigMap| async move {
//!     println!("{} has {} keys", cm.key(), cm.data.len());
//!     Ok::<(), anyhow::Error>(())
//! }));
//!
//! Controller::new(cache, reconciler, ControllerConfig::default().workers(2))
//!     .await
//!     .run()
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod cache;
pub mod cached_api;
pub mod controller;
pub mod error;
pub mod filtered_view;
pub mod listener;
pub mod matcher;
pub mod watch_stream;
pub mod work_queue;

pub use backoff::FibonacciBackoff;
pub use cache::{ListenerId, ResourceCache};
pub use cached_api::CachedApi;
pub use controller::{
    key_from_label, object_key_indexer, Controller, ControllerConfig, ErrorPolicy, FnReconciler, Indexer,
    Notifier, Reconciler, RemoveReconciler,
};
pub use error::InformerError;
pub use filtered_view::{FilteredView, ViewStopper};
pub use listener::EventListener;
pub use work_queue::{QueueConfig, WorkQueue};
pub use watch_stream::WatchStream;
