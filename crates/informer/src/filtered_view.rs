//! Per-consumer filtered event stream over a resource cache.
//!
//! A [`FilteredView`] is registered as a cache listener. It first receives the
//! cache contents as `Added` events, then live events, and forwards only those
//! matching its namespace and label selectors. The output channel has a small
//! buffer; a consumer that stops draining it stalls delivery to every other
//! listener of the same cache.
//!
//! Stopping the view (explicitly, through a [`ViewStopper`], by dropping it, or
//! because the cache failed) makes delivery a no-op and ends the stream: the
//! consumer sees `None` exactly once after any already-buffered events.

use crate::listener::EventListener;
use crate::matcher;
use async_trait::async_trait;
use futures::Stream;
use resources::{LabelSelector, Resource, WatchEvent};
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const VIEW_BUFFER: usize = 16;

struct ViewListener<T> {
    namespace: Option<String>,
    selectors: Vec<LabelSelector>,
    /// Taken on stop so the receiver observes end-of-stream
    tx: Mutex<Option<mpsc::Sender<WatchEvent<T>>>>,
    stopped: CancellationToken,
}

impl<T> ViewListener<T> {
    fn close(&self) {
        self.stopped.cancel();
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

#[async_trait]
impl<T: Resource> EventListener<T> for ViewListener<T> {
    async fn on_event(&self, event: &WatchEvent<T>) {
        if self.stopped.is_cancelled()
            || !matcher::matches(self.namespace.as_deref(), &self.selectors, &event.object)
        {
            return;
        }

        let Some(tx) = self.tx.lock().unwrap_or_else(PoisonError::into_inner).clone() else {
            return;
        };

        tokio::select! {
            biased;
            () = self.stopped.cancelled() => {}
            sent = tx.send(event.clone()) => {
                if sent.is_err() {
                    // Receiver dropped without stopping the view.
                    self.close();
                }
            }
        }
    }

    fn stop(&self) {
        self.close();
    }

    fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }
}

/// Stops a [`FilteredView`] from any task.
#[derive(Clone)]
pub struct ViewStopper {
    stop: Arc<dyn Fn() + Send + Sync>,
    stopped: CancellationToken,
}

impl ViewStopper {
    /// Idempotent.
    pub fn stop(&self) {
        (self.stop)();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }
}

impl fmt::Debug for ViewStopper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewStopper")
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

/// Filtered event stream of one consumer.
pub struct FilteredView<T> {
    rx: mpsc::Receiver<WatchEvent<T>>,
    stopper: ViewStopper,
}

impl<T: Resource> FilteredView<T> {
    /// Builds a view and the listener that feeds it. The listener still has
    /// to be registered with a cache.
    pub(crate) fn new(namespace: Option<&str>, selectors: Vec<LabelSelector>) -> (Self, Arc<dyn EventListener<T>>) {
        let (tx, rx) = mpsc::channel(VIEW_BUFFER);
        let stopped = CancellationToken::new();
        let listener = Arc::new(ViewListener {
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
            selectors,
            tx: Mutex::new(Some(tx)),
            stopped: stopped.clone(),
        });

        let closer = Arc::clone(&listener);
        let stopper = ViewStopper {
            stop: Arc::new(move || closer.close()),
            stopped,
        };

        let listener: Arc<dyn EventListener<T>> = listener;
        (Self { rx, stopper }, listener)
    }

    /// Next matching event, or `None` once the view has been stopped.
    pub async fn next(&mut self) -> Option<WatchEvent<T>> {
        self.rx.recv().await
    }
}

impl<T> FilteredView<T> {
    /// Stops delivery. Events already buffered are still returned before the
    /// stream ends.
    pub fn stop(&self) {
        self.stopper.stop();
    }

    pub fn stopper(&self) -> ViewStopper {
        self.stopper.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopper.is_stopped()
    }
}

impl<T> Stream for FilteredView<T> {
    type Item = WatchEvent<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> Drop for FilteredView<T> {
    fn drop(&mut self) {
        self.stopper.stop();
    }
}

impl<T> fmt::Debug for FilteredView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilteredView")
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}
