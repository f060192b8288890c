//! Listener seam of the resource cache.

use async_trait::async_trait;
use resources::{Resource, WatchEvent};

/// Receives every event a [`ResourceCache`](crate::ResourceCache) applies.
///
/// Events arrive from the cache's apply task one at a time, in server order.
/// `on_event` may apply backpressure; while it is pending, no other listener
/// of the same cache receives anything.
#[async_trait]
pub trait EventListener<T: Resource>: Send + Sync {
    async fn on_event(&self, event: &WatchEvent<T>);

    /// Called once when the cache stops or the listener is unregistered.
    fn stop(&self);

    /// A stopped listener is dropped from the cache on the next event.
    fn is_stopped(&self) -> bool {
        false
    }
}
