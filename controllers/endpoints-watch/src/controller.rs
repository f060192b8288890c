//! Main controller implementation.
//!
//! Builds the Endpoints cache, runs the informer controller on it and, when
//! the cache's watch fails, discards both and starts over from a fresh list
//! after a Fibonacci backoff.

use crate::config::Config;
use crate::error::ControllerError;
use crate::reconciler::EndpointsReconciler;
use apiserver_client::ObjectApi;
use informer::{Controller, ControllerConfig, FibonacciBackoff, Reconciler, ResourceCache};
use resources::{Endpoints, ListOptions};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const MIN_REBUILD_DELAY: Duration = Duration::from_secs(1);
const MAX_REBUILD_DELAY: Duration = Duration::from_secs(60);

/// Main controller for Endpoints watching.
pub struct EndpointsController {
    api: Arc<dyn ObjectApi<Endpoints>>,
    reconciler: Arc<EndpointsReconciler>,
    config: Config,
    shutdown: CancellationToken,
    backoff: FibonacciBackoff,
}

impl EndpointsController {
    pub fn new(api: Arc<dyn ObjectApi<Endpoints>>, config: Config) -> Self {
        Self {
            api,
            reconciler: Arc::new(EndpointsReconciler::new()),
            config,
            shutdown: CancellationToken::new(),
            backoff: FibonacciBackoff::new(MIN_REBUILD_DELAY, MAX_REBUILD_DELAY),
        }
    }

    /// Cancelling the token makes [`run`](Self::run) return `Ok(())`.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn reconciler(&self) -> &Arc<EndpointsReconciler> {
        &self.reconciler
    }

    /// Runs until shutdown, rebuilding the cache whenever it fails.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Endpoints Watch Controller running");

        while !self.shutdown.is_cancelled() {
            let cache = match ResourceCache::new(
                Arc::clone(&self.api),
                self.config.namespace.as_deref(),
                ListOptions::default(),
            )
            .await
            {
                Ok(cache) => Arc::new(cache),
                Err(e) => {
                    error!("Failed to build Endpoints cache: {}", e);
                    self.wait_before_rebuild().await;
                    continue;
                }
            };
            self.backoff.reset();
            info!("Endpoints cache ready with {} objects", cache.len());

            let controller_config = ControllerConfig::default()
                .workers(self.config.workers)
                .error_policy(self.config.error_policy);
            let reconciler: Arc<dyn Reconciler<Endpoints>> = self.reconciler.clone();
            let controller = Controller::new(Arc::clone(&cache), reconciler, controller_config).await;
            self.requeue_vanished(&cache, &controller);
            let stop = controller.shutdown_handle();

            let run = controller.run();
            tokio::pin!(run);
            let result = tokio::select! {
                result = &mut run => result,
                () = self.shutdown.cancelled() => {
                    stop.cancel();
                    run.await
                }
            };
            cache.shutdown().await;

            match result {
                Ok(()) => break,
                Err(e) => {
                    warn!("Controller stopped: {}; rebuilding cache", e);
                    self.wait_before_rebuild().await;
                }
            }
        }

        info!("Endpoints Watch Controller stopped");
        Ok(())
    }

    /// Queues tracked keys the fresh list no longer has, so deletions missed
    /// while the watch was down still reach the remover.
    fn requeue_vanished(&self, cache: &ResourceCache<Endpoints>, controller: &Controller<Endpoints>) {
        let listed: HashSet<String> = cache.keys().into_iter().collect();
        for key in self.reconciler.tracked_keys() {
            if !listed.contains(&key) {
                info!("Endpoints {} disappeared while the watch was down", key);
                controller.queue().notify(&key);
            }
        }
    }

    async fn wait_before_rebuild(&mut self) {
        let delay = self.backoff.next_backoff();
        info!("Rebuilding Endpoints cache in {}s", delay.as_secs());
        tokio::select! {
            () = self.shutdown.cancelled() => {}
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiserver_client::{LiveWatch, MockApi};
    use informer::ErrorPolicy;
    use resources::{EndpointAddress, EndpointSubset, EventType, ObjectMeta};

    fn config() -> Config {
        Config {
            apiserver_url: None,
            apiserver_token: None,
            namespace: None,
            workers: 1,
            error_policy: ErrorPolicy::Requeue,
        }
    }

    fn endpoints(name: &str, ip: &str) -> Endpoints {
        Endpoints {
            metadata: ObjectMeta::namespaced("default", name).with_resource_version("1"),
            subsets: vec![EndpointSubset {
                addresses: vec![EndpointAddress {
                    ip: ip.to_string(),
                    target_ref: None,
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..400 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_reconciles_listed_and_watched_endpoints() {
        let api = MockApi::new();
        api.add_object(endpoints("web", "10.0.0.1"));
        let live = api.push_live_watch();

        let controller = EndpointsController::new(Arc::new(api.clone()), config());
        let reconciler = Arc::clone(controller.reconciler());
        let shutdown = controller.shutdown_handle();
        let running = tokio::spawn(controller.run());

        wait_for(|| reconciler.ready_addresses("default/web").is_some()).await;

        live.send(EventType::Modified, &endpoints("web", "10.0.0.7"));
        wait_for(|| reconciler.ready_addresses("default/web") == Some(vec!["10.0.0.7".to_string()])).await;

        live.send(EventType::Deleted, &endpoints("web", "10.0.0.7"));
        wait_for(|| reconciler.tracked() == 0).await;

        shutdown.cancel();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_during_rebuild_backoff() {
        let api: MockApi<Endpoints> = MockApi::new();
        api.fail_list(503, "unavailable");

        let controller = EndpointsController::new(Arc::new(api.clone()), config());
        let shutdown = controller.shutdown_handle();
        let running = tokio::spawn(controller.run());

        wait_for(|| api.list_calls() >= 1).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_rebuild_removes_endpoints_deleted_during_outage() {
        let api = MockApi::new();
        api.add_object(endpoints("web", "10.0.0.1"));
        api.add_object(endpoints("db", "10.0.0.2"));
        let first: LiveWatch = api.push_live_watch();
        let _second = api.push_live_watch();

        let mut config = config();
        config.workers = 2;
        let controller = EndpointsController::new(Arc::new(api.clone()), config);
        let reconciler = Arc::clone(controller.reconciler());
        let shutdown = controller.shutdown_handle();
        let running = tokio::spawn(controller.run());

        wait_for(|| reconciler.tracked() == 2).await;

        api.remove_object("default/web");
        first.fail("connection reset by peer");

        tokio::time::timeout(Duration::from_secs(5), async {
            while api.list_calls() < 2 || reconciler.ready_addresses("default/web").is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(reconciler.tracked(), 1);
        assert!(reconciler.ready_addresses("default/db").is_some());

        shutdown.cancel();
        running.await.unwrap().unwrap();
    }
}
