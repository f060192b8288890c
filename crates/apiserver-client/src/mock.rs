//! Mock ObjectApi for unit testing
//!
//! This module provides an in-memory implementation of [`ObjectApi`] that can
//! be used in tests without a running API server.
//!
//! Watch responses are scripted: each call to `watch` consumes the next
//! [`WatchScript`], whose frames are returned as the response body followed
//! by the scripted ending. A [`LiveWatch`] instead hands the test a sender
//! that feeds the body while the watch is open. Once the queued responses run
//! out, further watches stay open without producing anything.

use crate::api_trait::{ByteStream, ObjectApi};
use crate::error::ClientError;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use resources::{labels_match, object_key, EventType, ListOptions, ObjectList, Resource, WatchEvent};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// How a scripted watch response ends after its frames.
#[derive(Debug, Clone)]
pub enum WatchEnd {
    /// Clean end of body, as when the server times the watch out
    Eof,
    /// The body stream breaks with a transport error
    Error(String),
    /// The connection stays open with no further data
    Hang,
}

/// One scripted watch response.
#[derive(Debug, Clone)]
pub struct WatchScript {
    pub frames: Vec<Bytes>,
    pub end: WatchEnd,
}

impl WatchScript {
    /// A response that delivers `frames` and then ends cleanly.
    pub fn new(frames: Vec<Bytes>) -> Self {
        Self {
            frames,
            end: WatchEnd::Eof,
        }
    }

    #[must_use]
    pub fn then(mut self, end: WatchEnd) -> Self {
        self.end = end;
        self
    }

    /// Serializes an event as one newline-terminated frame.
    pub fn frame<T: Resource>(event_type: EventType, object: &T) -> Bytes {
        let mut line = serde_json::to_vec(&WatchEvent::new(event_type, object))
            .expect("watch event serializes");
        line.push(b'\n');
        Bytes::from(line)
    }
}

/// Sender side of a watch response that stays open until dropped.
///
/// Dropping the last `LiveWatch` ends the body cleanly.
#[derive(Debug, Clone)]
pub struct LiveWatch {
    tx: mpsc::UnboundedSender<Result<Bytes, ClientError>>,
}

impl LiveWatch {
    /// Sends one event frame. Returns `false` once the watcher is gone.
    pub fn send<T: Resource>(&self, event_type: EventType, object: &T) -> bool {
        self.send_raw(WatchScript::frame(event_type, object))
    }

    pub fn send_raw(&self, chunk: Bytes) -> bool {
        self.tx.send(Ok(chunk)).is_ok()
    }

    /// Breaks the body with a transport error.
    pub fn fail(&self, message: &str) -> bool {
        self.tx.send(Err(ClientError::Stream(message.to_string()))).is_ok()
    }
}

#[derive(Debug)]
enum QueuedWatch {
    Script(WatchScript),
    Live(mpsc::UnboundedReceiver<Result<Bytes, ClientError>>),
}

struct MockState<T> {
    objects: BTreeMap<String, T>,
    list_resource_version: String,
    list_error: Option<(u16, String)>,
    list_calls: usize,
    watch_scripts: VecDeque<QueuedWatch>,
    watch_errors: VecDeque<(u16, String)>,
    watch_requests: Vec<ListOptions>,
}

/// In-memory [`ObjectApi`] with scripted watch responses.
pub struct MockApi<T> {
    state: Arc<Mutex<MockState<T>>>,
}

impl<T> Clone for MockApi<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Resource> Default for MockApi<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Resource> MockApi<T> {
    /// Create a new mock with an empty collection
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                objects: BTreeMap::new(),
                list_resource_version: "1".to_string(),
                list_error: None,
                list_calls: 0,
                watch_scripts: VecDeque::new(),
                watch_errors: VecDeque::new(),
                watch_requests: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState<T>> {
        self.state.lock().expect("mock state poisoned")
    }

    /// Add an object to the mock store (for test setup)
    pub fn add_object(&self, object: T) {
        self.state().objects.insert(object.key(), object);
    }

    /// Resume token returned by list
    pub fn set_list_resource_version(&self, version: impl Into<String>) {
        self.state().list_resource_version = version.into();
    }

    /// Make every list call fail with the given status
    pub fn fail_list(&self, code: u16, body: impl Into<String>) {
        self.state().list_error = Some((code, body.into()));
    }

    /// Queue a watch response
    pub fn push_watch(&self, script: WatchScript) {
        self.state().watch_scripts.push_back(QueuedWatch::Script(script));
    }

    /// Queue a watch response fed by the returned sender
    pub fn push_live_watch(&self) -> LiveWatch {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().watch_scripts.push_back(QueuedWatch::Live(rx));
        LiveWatch { tx }
    }

    /// Make the next watch request fail with the given status
    pub fn fail_next_watch(&self, code: u16, body: impl Into<String>) {
        self.state().watch_errors.push_back((code, body.into()));
    }

    /// Options carried by every watch request so far, in order
    pub fn watch_requests(&self) -> Vec<ListOptions> {
        self.state().watch_requests.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }

    pub fn object(&self, key: &str) -> Option<T> {
        self.state().objects.get(key).cloned()
    }

    /// Drop an object from the store without emitting a watch event
    pub fn remove_object(&self, key: &str) -> Option<T> {
        self.state().objects.remove(key)
    }

    fn not_found(key: &str) -> ClientError {
        ClientError::Status {
            code: 404,
            url: format!("mock://{}/{}", T::gvr().resource, key),
            body: format!("{key} not found"),
        }
    }
}

#[async_trait::async_trait]
impl<T: Resource> ObjectApi<T> for MockApi<T> {
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<T, ClientError> {
        let key = object_key(namespace, name);
        self.object(&key).ok_or_else(|| Self::not_found(&key))
    }

    async fn list(&self, namespace: Option<&str>, options: &ListOptions) -> Result<ObjectList<T>, ClientError> {
        let mut state = self.state();
        state.list_calls += 1;

        if let Some((code, body)) = &state.list_error {
            return Err(ClientError::Status {
                code: *code,
                url: format!("mock://{}", T::gvr().resource),
                body: body.clone(),
            });
        }

        let items = state
            .objects
            .values()
            .filter(|o| namespace.is_none_or(|ns| ns.is_empty() || o.namespace() == Some(ns)))
            .filter(|o| labels_match(&options.label_selector, o.labels()))
            .cloned()
            .collect();
        Ok(ObjectList::new(items, state.list_resource_version.clone()))
    }

    async fn watch(
        &self,
        _namespace: Option<&str>,
        _name: Option<&str>,
        options: &ListOptions,
    ) -> Result<ByteStream, ClientError> {
        let mut state = self.state();
        state.watch_requests.push(options.clone());

        if let Some((code, body)) = state.watch_errors.pop_front() {
            return Err(ClientError::Status {
                code,
                url: format!("mock://{}?watch=1", T::gvr().resource),
                body,
            });
        }

        let script = match state.watch_scripts.pop_front() {
            None => return Ok(stream::pending().boxed()),
            Some(QueuedWatch::Live(rx)) => {
                let body = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|chunk| (chunk, rx)) });
                return Ok(body.boxed());
            }
            Some(QueuedWatch::Script(script)) => script,
        };

        let frames = stream::iter(script.frames.into_iter().map(Ok));
        let body = match script.end {
            WatchEnd::Eof => frames.boxed(),
            WatchEnd::Error(message) => frames
                .chain(stream::once(async move { Err(ClientError::Stream(message)) }))
                .boxed(),
            WatchEnd::Hang => frames.chain(stream::pending()).boxed(),
        };
        Ok(body)
    }

    async fn create(&self, _namespace: Option<&str>, object: &T) -> Result<T, ClientError> {
        self.add_object(object.clone());
        Ok(object.clone())
    }

    async fn patch(&self, namespace: Option<&str>, name: &str, _field_manager: &str, object: &T) -> Result<T, ClientError> {
        let key = object_key(namespace, name);
        let mut state = self.state();
        if !state.objects.contains_key(&key) {
            return Err(Self::not_found(&key));
        }
        state.objects.insert(key, object.clone());
        Ok(object.clone())
    }

    async fn apply(
        &self,
        namespace: Option<&str>,
        name: &str,
        _field_manager: &str,
        _force: bool,
        object: &T,
    ) -> Result<(T, EventType), ClientError> {
        let key = object_key(namespace, name);
        let previous = self.state().objects.insert(key, object.clone());
        let event_type = if previous.is_some() {
            EventType::Modified
        } else {
            EventType::Added
        };
        Ok((object.clone(), event_type))
    }

    async fn delete(&self, namespace: Option<&str>, name: &str, _force: bool) -> Result<T, ClientError> {
        let key = object_key(namespace, name);
        self.state().objects.remove(&key).ok_or_else(|| Self::not_found(&key))
    }
}
