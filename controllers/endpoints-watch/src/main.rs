//! Endpoints Watch Controller
//!
//! Keeps an informer cache of `Endpoints` objects and logs the ready
//! addresses of every object as they change:
//! - lists and watches Endpoints in `WATCH_NAMESPACE` (all namespaces if unset)
//! - reconciles each changed object from the local cache
//! - rebuilds the cache from a fresh list when its watch fails
//!
//! Log verbosity is controlled with `RUST_LOG` (default `info`).

mod config;
mod controller;
mod error;
mod reconciler;

use apiserver_client::{Api, HttpClient};
use config::Config;
use controller::EndpointsController;
use error::ControllerError;
use resources::Endpoints;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Endpoints Watch Controller");

    let config = Config::from_env()?;
    let client_config = config.client_config()?;

    info!("Configuration:");
    info!("  API server: {}", client_config.server_url);
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Workers: {}", config.workers);
    info!("  Error policy: {:?}", config.error_policy);

    let client = Arc::new(HttpClient::new(client_config)?);
    let api: Api<Endpoints> = Api::new(client);

    let controller = EndpointsController::new(Arc::new(api), config);
    let reconciler = Arc::clone(controller.reconciler());
    let shutdown = controller.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received interrupt, shutting down");
                shutdown.cancel();
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    controller.run().await?;
    info!("Tracking {} Endpoints objects at exit", reconciler.tracked());
    Ok(())
}
