//! Deduplicating, rate-limited queue of reconcile keys.
//!
//! Each key is in one of four states: absent, queued, in flight, or in
//! flight with a pending requeue. A key handed out by [`WorkQueue::get`] is
//! not handed out again until [`WorkQueue::done`] is called for it; a
//! notification that arrives meanwhile is remembered and produces exactly one
//! more pass afterwards.

use crate::backoff::FibonacciBackoff;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Retry delays for [`WorkQueue::add_rate_limited`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Delay of the first and second retry
    pub min_retry_delay: Duration,
    /// Upper bound on any retry delay
    pub max_retry_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(300),
        }
    }
}

impl QueueConfig {
    #[must_use]
    pub fn with_retry_delays(mut self, min: Duration, max: Duration) -> Self {
        self.min_retry_delay = min;
        self.max_retry_delay = max;
        self
    }
}

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<String>,
    /// Keys waiting for a pass (queued, or requeue-pending while in flight)
    dirty: HashSet<String>,
    processing: HashSet<String>,
    failures: HashMap<String, u32>,
    shutdown: bool,
}

/// Work queue shared by the notifiers and workers of a controller.
#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    available: Notify,
    config: QueueConfig,
    /// Cancels pending delayed requeues
    closed: CancellationToken,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl WorkQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            config,
            closed: CancellationToken::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `key` as needing a pass.
    ///
    /// No-op when the key is already queued. When the key is in flight it is
    /// queued again once `done` is called for it.
    pub fn notify(&self, key: &str) {
        let mut state = self.state();
        if state.shutdown || state.dirty.contains(key) {
            return;
        }

        state.dirty.insert(key.to_string());
        if state.processing.contains(key) {
            return;
        }

        state.queue.push_back(key.to_string());
        drop(state);
        self.available.notify_one();
    }

    /// Waits for the next key and marks it in flight.
    ///
    /// Returns `None` once the queue is shut down, even if keys are still
    /// queued.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if state.shutdown {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Ends the pass over `key`. A notification received while it was in
    /// flight queues it again.
    pub fn done(&self, key: &str) {
        let mut state = self.state();
        state.processing.remove(key);

        if state.shutdown || !state.dirty.contains(key) {
            return;
        }
        state.queue.push_back(key.to_string());
        drop(state);
        self.available.notify_one();
    }

    /// Queues `key` after `delay`. Dropped if the queue shuts down first.
    pub fn notify_after(self: &Arc<Self>, key: &str, delay: Duration) {
        if self.is_shutdown() {
            return;
        }

        let queue = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::select! {
                () = queue.closed.cancelled() => {}
                () = tokio::time::sleep(delay) => queue.notify(&key),
            }
        });
    }

    /// Queues `key` after a delay that grows with each consecutive call for
    /// the same key, until [`forget`](Self::forget) resets it.
    pub fn add_rate_limited(self: &Arc<Self>, key: &str) {
        let delay = {
            let mut state = self.state();
            let failures = state.failures.entry(key.to_string()).or_insert(0);
            let delay = FibonacciBackoff::calculate_for_error_count(
                *failures,
                self.config.min_retry_delay,
                self.config.max_retry_delay,
            );
            *failures += 1;
            delay
        };

        debug!("Requeueing {} in {:?}", key, delay);
        self.notify_after(key, delay);
    }

    /// Clears the retry history of `key`.
    pub fn forget(&self, key: &str) {
        self.state().failures.remove(key);
    }

    /// Number of rate-limited requeues of `key` since it was last forgotten.
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.state().failures.get(key).copied().unwrap_or(0)
    }

    /// Keys waiting to be handed out (not counting in-flight ones).
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wakes every blocked `get` with `None` and rejects further keys.
    pub fn shutdown(&self) {
        self.state().shutdown = true;
        self.closed.cancel();
        self.available.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.state().shutdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_queue() -> Arc<WorkQueue> {
        Arc::new(WorkQueue::new(
            QueueConfig::default().with_retry_delays(Duration::from_millis(10), Duration::from_millis(50)),
        ))
    }

    #[tokio::test]
    async fn test_duplicate_notify_queues_once() {
        let queue = WorkQueue::default();
        queue.notify("ns/a");
        queue.notify("ns/a");
        queue.notify("ns/b");

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get().await.as_deref(), Some("ns/a"));
        assert_eq!(queue.get().await.as_deref(), Some("ns/b"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_notify_while_in_flight_requeues_after_done() {
        let queue = WorkQueue::default();
        queue.notify("k");
        let key = queue.get().await.unwrap();

        queue.notify("k");
        queue.notify("k");
        assert!(queue.is_empty());
        let second = tokio::time::timeout(Duration::from_millis(30), queue.get()).await;
        assert!(second.is_err(), "in-flight key handed out twice");

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.as_deref(), Some("k"));
        queue.done("k");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_done_without_notify_clears_key() {
        let queue = WorkQueue::default();
        queue.notify("k");
        let key = queue.get().await.unwrap();
        queue.done(&key);

        assert!(queue.is_empty());
        queue.notify("k");
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_blocked_get_wakes_on_notify() {
        let queue = Arc::new(WorkQueue::default());
        let getter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.notify("k");

        let key = tokio::time::timeout(Duration::from_secs(1), getter).await.unwrap().unwrap();
        assert_eq!(key.as_deref(), Some("k"));
    }

    #[tokio::test]
    async fn test_shutdown_releases_all_getters() {
        let queue = Arc::new(WorkQueue::default());
        let getters: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { queue.get().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.shutdown();

        for getter in getters {
            let key = tokio::time::timeout(Duration::from_secs(1), getter).await.unwrap().unwrap();
            assert!(key.is_none());
        }
        queue.notify("late");
        assert!(queue.is_empty());
        assert!(queue.get().await.is_none());
    }

    #[tokio::test]
    async fn test_rate_limited_requeue_is_delayed_and_counted() {
        let queue = fast_queue();
        queue.add_rate_limited("k");
        assert!(queue.is_empty());
        assert_eq!(queue.num_requeues("k"), 1);

        let key = tokio::time::timeout(Duration::from_secs(1), queue.get()).await.unwrap();
        assert_eq!(key.as_deref(), Some("k"));
        queue.done("k");

        queue.add_rate_limited("k");
        assert_eq!(queue.num_requeues("k"), 2);
        queue.forget("k");
        assert_eq!(queue.num_requeues("k"), 0);
    }

    #[tokio::test]
    async fn test_shutdown_drops_pending_requeues() {
        let queue = fast_queue();
        queue.add_rate_limited("k");
        queue.shutdown();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(queue.is_empty());
    }
}
