//! List+watch backed resource cache.
//!
//! [`ResourceCache`] lists a collection once, then keeps an in-memory mirror
//! current from a single [`WatchStream`]. One background task owns the
//! "apply event, update map, fan out" sequence, so every listener sees events
//! in the order the server sent them.
//!
//! Registration and fan-out share one lock: a listener registered mid-stream
//! gets the current contents as synthetic `Added` events and then every later
//! event, with nothing missed and nothing delivered twice.
//!
//! When the watch fails the cache becomes not-ready, stops all listeners and
//! makes no further requests. Reads keep returning the last known state. A
//! failed cache is not repaired; build a new one.

use crate::error::InformerError;
use crate::filtered_view::FilteredView;
use crate::listener::EventListener;
use crate::matcher;
use crate::watch_stream::WatchStream;
use apiserver_client::ObjectApi;
use resources::{LabelSelector, ListOptions, Resource, WatchEvent};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Handle returned by [`ResourceCache::register_listener`].
pub type ListenerId = u64;

type ListenerEntry<T> = (ListenerId, Arc<dyn EventListener<T>>);

struct CacheState<T: Resource> {
    items: RwLock<HashMap<String, T>>,
    /// Held across apply + fan-out and across registration replay
    listeners: Mutex<Vec<ListenerEntry<T>>>,
    next_listener: AtomicU64,
    ready: AtomicBool,
    last_error: std::sync::Mutex<Option<String>>,
    /// Same token as the watch stream's; also aborts blocked deliveries
    stop: CancellationToken,
}

impl<T: Resource> CacheState<T> {
    async fn apply(&self, event: WatchEvent<T>) {
        let mut listeners = self.listeners.lock().await;

        let key = event.object.key();
        {
            let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
            if event.is_delete() {
                items.remove(&key);
            } else {
                items.insert(key, event.object.clone());
            }
        }

        for (_, listener) in listeners.iter() {
            if listener.is_stopped() {
                continue;
            }
            if !self.deliver(listener.as_ref(), &event).await {
                debug!("Cache stopped during fan-out of {}", event.object.key());
                return;
            }
        }

        listeners.retain(|(id, listener)| {
            let stopped = listener.is_stopped();
            if stopped {
                debug!("Dropping stopped listener {}", id);
            }
            !stopped
        });
    }

    /// Delivers one event unless the cache is stopped first. Returns `false`
    /// when the stop token won.
    async fn deliver(&self, listener: &dyn EventListener<T>, event: &WatchEvent<T>) -> bool {
        tokio::select! {
            biased;
            () = self.stop.cancelled() => false,
            () = listener.on_event(event) => true,
        }
    }

    async fn register(&self, listener: Arc<dyn EventListener<T>>) -> ListenerId {
        let mut listeners = self.listeners.lock().await;
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);

        if !self.ready.load(Ordering::Acquire) || self.stop.is_cancelled() {
            debug!("Cache is not ready, stopping new listener {}", id);
            listener.stop();
            return id;
        }

        let snapshot: Vec<T> = self.snapshot();
        for object in snapshot {
            if listener.is_stopped() {
                break;
            }
            if !self.deliver(listener.as_ref(), &WatchEvent::added(object)).await {
                debug!("Cache stopped while replaying to listener {}", id);
                listener.stop();
                return id;
            }
        }

        listeners.push((id, listener));
        id
    }

    async fn terminate(&self) {
        let mut listeners = self.listeners.lock().await;
        self.ready.store(false, Ordering::Release);
        for (_, listener) in listeners.drain(..) {
            listener.stop();
        }
    }

    fn snapshot(&self) -> Vec<T> {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

/// Local mirror of one watched collection.
pub struct ResourceCache<T: Resource> {
    state: Arc<CacheState<T>>,
    namespace: Option<String>,
    /// Stops the watch stream, which ends the apply task
    stop: CancellationToken,
    /// Cancelled by the apply task on its way out
    terminated: CancellationToken,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
    /// Background registrations started by `watch`
    registrations: std::sync::Mutex<JoinSet<()>>,
}

impl<T: Resource> ResourceCache<T> {
    /// Lists the collection and starts watching from the list's resource
    /// version.
    ///
    /// Fails without returning a cache when either the list or the first
    /// watch request fails.
    pub async fn new(
        api: Arc<dyn ObjectApi<T>>,
        namespace: Option<&str>,
        options: ListOptions,
    ) -> Result<Self, InformerError> {
        let namespace = namespace.filter(|ns| !ns.is_empty());
        let resource = T::gvr().resource;

        let list = api.list(namespace, &options).await?;
        let mut watch_options = options;
        watch_options.resource_version = list.resource_version().map(str::to_string);

        let items: HashMap<String, T> = list.items.into_iter().map(|item| (item.key(), item)).collect();
        info!(
            "Cache for {} in {} populated with {} objects at resource version {:?}",
            resource,
            namespace.unwrap_or("all namespaces"),
            items.len(),
            watch_options.resource_version
        );

        let stream = WatchStream::connect(api, namespace, None, watch_options).await?;
        let stop = stream.stop_handle();
        let terminated = CancellationToken::new();

        let state = Arc::new(CacheState {
            items: RwLock::new(items),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            ready: AtomicBool::new(true),
            last_error: std::sync::Mutex::new(None),
            stop: stop.clone(),
        });

        let task = tokio::spawn(run_apply_loop(Arc::clone(&state), stream, terminated.clone()));

        Ok(Self {
            state,
            namespace: namespace.map(str::to_string),
            stop,
            terminated,
            task: std::sync::Mutex::new(Some(task)),
            registrations: std::sync::Mutex::new(JoinSet::new()),
        })
    }

    /// Cached object by identity key. Never touches the network.
    pub fn get(&self, key: &str) -> Option<T> {
        self.state
            .items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// All cached objects, in no particular order.
    pub fn list(&self) -> Vec<T> {
        self.state.snapshot()
    }

    /// Cached objects in `namespace` (any when `None` or empty) that satisfy
    /// every selector.
    pub fn list_matching(&self, namespace: Option<&str>, selectors: &[LabelSelector]) -> Vec<T> {
        self.state
            .items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|item| matcher::matches(namespace, selectors, *item))
            .cloned()
            .collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.state
            .items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.items.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `false` once the watch has failed or the cache was stopped.
    pub fn is_ready(&self) -> bool {
        self.state.ready.load(Ordering::Acquire)
    }

    /// Error that ended the watch, if it ended by failing.
    pub fn last_error(&self) -> Option<String> {
        self.state
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Namespace the cache was scoped to.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Replays the current contents to `listener` as `Added` events, then
    /// subscribes it to every later event.
    ///
    /// The replay happens on the caller's task. A listener whose delivery
    /// waits on a consumer must not be registered from that consumer's task;
    /// [`watch`](Self::watch) registers in the background for that reason.
    ///
    /// Registering with a cache that is no longer ready stops the listener
    /// immediately.
    pub async fn register_listener(&self, listener: Arc<dyn EventListener<T>>) -> ListenerId {
        self.state.register(listener).await
    }

    /// Removes and stops a listener. Returns `false` when it was not
    /// registered (or already pruned).
    pub async fn unregister_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.state.listeners.lock().await;
        match listeners.iter().position(|(entry, _)| *entry == id) {
            Some(index) => {
                let (_, listener) = listeners.remove(index);
                listener.stop();
                true
            }
            None => false,
        }
    }

    /// Filtered live view: the matching current contents, then matching
    /// changes as they are applied.
    ///
    /// Registration runs on a task owned by the cache and is abandoned when
    /// the cache stops.
    pub fn watch(&self, namespace: Option<&str>, selectors: Vec<LabelSelector>) -> FilteredView<T> {
        let (view, listener) = FilteredView::new(namespace, selectors);
        let state = Arc::clone(&self.state);
        let mut registrations = self.registrations.lock().unwrap_or_else(PoisonError::into_inner);
        while registrations.try_join_next().is_some() {}
        registrations.spawn(async move {
            state.register(listener).await;
        });
        view
    }

    /// Stops the watch. Deliveries in progress are abandoned and every
    /// listener is stopped once the apply task exits.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Stops the watch and waits for the apply task and any pending
    /// registrations to finish.
    pub async fn shutdown(&self) {
        self.stop();
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Cache apply task for {} panicked: {}", T::gvr().resource, e);
            }
        }

        let mut registrations =
            std::mem::take(&mut *self.registrations.lock().unwrap_or_else(PoisonError::into_inner));
        while let Some(result) = registrations.join_next().await {
            if let Err(e) = result {
                warn!("Listener registration for {} panicked: {}", T::gvr().resource, e);
            }
        }
    }

    /// Token cancelled when the cache stops applying events, for any reason.
    pub fn terminated(&self) -> CancellationToken {
        self.terminated.clone()
    }
}

impl<T: Resource> Drop for ResourceCache<T> {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl<T: Resource> fmt::Debug for ResourceCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCache")
            .field("resource", &T::gvr().resource)
            .field("namespace", &self.namespace)
            .field("len", &self.len())
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

async fn run_apply_loop<T: Resource>(
    state: Arc<CacheState<T>>,
    mut stream: WatchStream<T>,
    terminated: CancellationToken,
) {
    let resource = T::gvr().resource;
    loop {
        match stream.next().await {
            Ok(event) => {
                debug!("Applying {} {} {}", event.event_type, resource, event.object.key());
                state.apply(event).await;
            }
            Err(e) if e.is_stopped() => {
                info!("Cache for {} stopped", resource);
                break;
            }
            Err(e) => {
                error!("Watch on {} failed, cache is no longer ready: {}", resource, e);
                *state.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(e.to_string());
                break;
            }
        }
    }

    state.terminate().await;
    terminated.cancel();
}
