//! Reconciliation controller.
//!
//! A [`Controller`] turns cache events into work: a [`Notifier`] registered
//! on each watched cache maps every event to a key and notifies the
//! [`WorkQueue`]. Workers take keys off the queue, look the object up in the
//! primary cache (never the API server) and hand it to the [`Reconciler`].
//! Reconciliation is level triggered: the reconciler sees the current state
//! of the key, not the event that caused the pass.

use crate::cache::{ListenerId, ResourceCache};
use crate::error::InformerError;
use crate::listener::EventListener;
use crate::work_queue::{QueueConfig, WorkQueue};
use async_trait::async_trait;
use resources::{object_key, split_key, Resource, WatchEvent};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// User logic run for the current state of a key.
///
/// Must be idempotent: it can run several times for the same change.
#[async_trait]
pub trait Reconciler<T: Resource>: Send + Sync {
    async fn reconcile(&self, object: T) -> anyhow::Result<()>;

    /// Deletion handling, if this reconciler supports it.
    ///
    /// When a key is no longer in the cache and this returns `None`, the
    /// deletion is ignored.
    fn as_remover(&self) -> Option<&dyn RemoveReconciler> {
        None
    }
}

/// Handles keys whose object has disappeared from the cache.
#[async_trait]
pub trait RemoveReconciler: Send + Sync {
    async fn remove(&self, namespace: Option<&str>, name: &str) -> anyhow::Result<()>;
}

/// Adapts an async closure into a [`Reconciler`].
pub struct FnReconciler<F> {
    action: F,
}

impl<F> FnReconciler<F> {
    pub fn new(action: F) -> Self {
        Self { action }
    }
}

#[async_trait]
impl<T, F, Fut> Reconciler<T> for FnReconciler<F>
where
    T: Resource,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn reconcile(&self, object: T) -> anyhow::Result<()> {
        (self.action)(object).await
    }
}

impl<F> fmt::Debug for FnReconciler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnReconciler").finish_non_exhaustive()
    }
}

/// Maps an object to the key to reconcile; `None` skips the event.
pub type Indexer<T> = Arc<dyn Fn(&T) -> Option<String> + Send + Sync>;

/// The object's own identity key.
pub fn object_key_indexer<T: Resource>() -> Indexer<T> {
    Arc::new(|object: &T| Some(object.key()))
}

/// `namespace/<value of label>`; objects without the label (or with an
/// empty value) are skipped.
///
/// Lets changes to dependent objects trigger the object they belong to.
pub fn key_from_label<T: Resource>(label: &str) -> Indexer<T> {
    let label = label.to_string();
    Arc::new(move |object: &T| {
        object
            .labels()
            .get(&label)
            .filter(|value| !value.is_empty())
            .map(|value| object_key(object.namespace(), value))
    })
}

/// Cache listener that feeds a work queue.
pub struct Notifier<T> {
    queue: Arc<WorkQueue>,
    indexer: Indexer<T>,
    stopped: CancellationToken,
}

impl<T: Resource> Notifier<T> {
    pub fn new(queue: Arc<WorkQueue>, indexer: Indexer<T>, stopped: CancellationToken) -> Self {
        Self {
            queue,
            indexer,
            stopped,
        }
    }
}

#[async_trait]
impl<T: Resource> EventListener<T> for Notifier<T> {
    async fn on_event(&self, event: &WatchEvent<T>) {
        if let Some(key) = (self.indexer)(&event.object) {
            self.queue.notify(&key);
        }
    }

    fn stop(&self) {
        self.stopped.cancel();
    }

    fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }
}

impl<T> fmt::Debug for Notifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("stopped", &self.stopped.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// What a worker does with a failed reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Log, retry with backoff, and reset the backoff on the next success
    #[default]
    Requeue,
    /// Log only; the key's backoff is reset whatever the outcome
    Report,
}

impl FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "requeue" => Ok(ErrorPolicy::Requeue),
            "report" => Ok(ErrorPolicy::Report),
            other => Err(format!("unknown error policy '{other}' (expected 'requeue' or 'report')")),
        }
    }
}

/// Controller settings.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub workers: usize,
    pub error_policy: ErrorPolicy,
    pub queue: QueueConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            error_policy: ErrorPolicy::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Number of concurrent workers (at least one).
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    #[must_use]
    pub fn queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }
}

/// Drives a [`Reconciler`] from a primary cache and any extra sources.
pub struct Controller<T: Resource> {
    cache: Arc<ResourceCache<T>>,
    reconciler: Arc<dyn Reconciler<T>>,
    queue: Arc<WorkQueue>,
    config: ControllerConfig,
    shutdown: CancellationToken,
}

impl<T: Resource> Controller<T> {
    /// Registers a notifier on `cache` that queues each object under its own
    /// key. Every object already cached is queued once.
    pub async fn new(
        cache: Arc<ResourceCache<T>>,
        reconciler: Arc<dyn Reconciler<T>>,
        config: ControllerConfig,
    ) -> Self {
        let controller = Self {
            queue: Arc::new(WorkQueue::new(config.queue.clone())),
            cache,
            reconciler,
            config,
            shutdown: CancellationToken::new(),
        };
        controller.watches(&controller.cache, object_key_indexer()).await;
        controller
    }

    /// Queues keys derived by `indexer` from events of another cache.
    ///
    /// Keys are always looked up in the primary cache, so `indexer` must map
    /// to keys of the primary kind.
    pub async fn watches<U: Resource>(&self, cache: &ResourceCache<U>, indexer: Indexer<U>) -> ListenerId {
        let notifier = Arc::new(Notifier::new(
            Arc::clone(&self.queue),
            indexer,
            self.shutdown.child_token(),
        ));
        let id = cache.register_listener(notifier).await;
        debug!(
            "Controller for {} watching {} through listener {}",
            T::gvr().resource,
            U::gvr().resource,
            id
        );
        id
    }

    /// Token that ends [`run`](Self::run) cleanly when cancelled.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Runs the workers until shutdown or until the primary cache stops.
    ///
    /// Returns `Ok(())` after a requested shutdown and
    /// [`InformerError::CacheStopped`] when the cache ended on its own; the
    /// caller is expected to rebuild the cache and controller.
    pub async fn run(self) -> Result<(), InformerError> {
        let resource = T::gvr().resource;
        info!(
            "Controller for {} running with {} workers, error policy {:?}",
            resource, self.config.workers, self.config.error_policy
        );

        let workers: Vec<JoinHandle<()>> = (0..self.config.workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    cache: Arc::clone(&self.cache),
                    reconciler: Arc::clone(&self.reconciler),
                    queue: Arc::clone(&self.queue),
                    policy: self.config.error_policy,
                };
                tokio::spawn(worker.run())
            })
            .collect();

        let terminated = self.cache.terminated();
        let result = tokio::select! {
            () = self.shutdown.cancelled() => {
                info!("Controller for {} shutting down", resource);
                Ok(())
            }
            () = terminated.cancelled() => {
                let reason = self.cache.last_error().unwrap_or_else(|| "cache was stopped".to_string());
                error!("Cache for {} stopped, controller exiting: {}", resource, reason);
                Err(InformerError::CacheStopped(reason))
            }
        };

        self.shutdown.cancel();
        self.queue.shutdown();
        for worker in workers {
            if let Err(e) = worker.await {
                error!("Controller worker for {} panicked: {}", resource, e);
            }
        }

        result
    }
}

impl<T: Resource> fmt::Debug for Controller<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("resource", &T::gvr().resource)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

struct Worker<T: Resource> {
    id: usize,
    cache: Arc<ResourceCache<T>>,
    reconciler: Arc<dyn Reconciler<T>>,
    queue: Arc<WorkQueue>,
    policy: ErrorPolicy,
}

impl<T: Resource> Worker<T> {
    async fn run(self) {
        debug!("Worker {} started", self.id);
        while let Some(key) = self.queue.get().await {
            let result = self.process(&key).await;
            self.handle_result(&key, result);
            self.queue.done(&key);
        }
        debug!("Worker {} stopped", self.id);
    }

    async fn process(&self, key: &str) -> anyhow::Result<()> {
        if let Some(object) = self.cache.get(key) {
            debug!("Worker {} reconciling {}", self.id, key);
            return self.reconciler.reconcile(object).await;
        }

        match self.reconciler.as_remover() {
            Some(remover) => {
                let (namespace, name) = split_key(key);
                debug!("Worker {}: {} gone from cache, running removal", self.id, key);
                remover.remove(namespace, name).await
            }
            None => {
                debug!("Worker {}: {} gone from cache, nothing to do", self.id, key);
                Ok(())
            }
        }
    }

    fn handle_result(&self, key: &str, result: anyhow::Result<()>) {
        match (result, self.policy) {
            (Ok(()), _) => self.queue.forget(key),
            (Err(e), ErrorPolicy::Requeue) => {
                warn!(
                    "Reconciliation of {} failed (attempt {}), retrying: {:#}",
                    key,
                    self.queue.num_requeues(key) + 1,
                    e
                );
                self.queue.add_rate_limited(key);
            }
            (Err(e), ErrorPolicy::Report) => {
                error!("Reconciliation of {} failed: {:#}", key, e);
                self.queue.forget(key);
            }
        }
    }
}
