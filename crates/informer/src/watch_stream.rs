//! Reconnecting watch decoder.
//!
//! A watch response body is a sequence of newline-terminated JSON event
//! records. [`WatchStream`] splits the body into frames, decodes them into
//! typed [`WatchEvent`]s and remembers the resource version of the last
//! decoded object. When the server ends the body cleanly (watch timeout), a
//! new watch is opened from that resource version so no change is replayed
//! or missed. Any other failure closes the stream for good.

use crate::error::InformerError;
use apiserver_client::{ByteStream, ObjectApi};
use bytes::BytesMut;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use resources::{EventType, ListOptions, Resource, WatchEvent};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Typed, resuming view over a watch endpoint.
pub struct WatchStream<T: Resource> {
    api: Arc<dyn ObjectApi<T>>,
    namespace: Option<String>,
    name: Option<String>,
    /// Request options; `resource_version` is the resume token
    options: ListOptions,
    /// Current response body, `None` once the server ended it
    body: Option<ByteStream>,
    buffer: BytesMut,
    closed: bool,
    stop: CancellationToken,
}

impl<T: Resource> WatchStream<T> {
    /// Opens the first watch connection.
    ///
    /// `options.resource_version` is the token to resume from, usually the
    /// one returned by a preceding list. A failure here is returned as is;
    /// no retry is attempted.
    pub async fn connect(
        api: Arc<dyn ObjectApi<T>>,
        namespace: Option<&str>,
        name: Option<&str>,
        options: ListOptions,
    ) -> Result<Self, InformerError> {
        let mut stream = Self {
            api,
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
            name: name.map(str::to_string),
            options,
            body: None,
            buffer: BytesMut::new(),
            closed: false,
            stop: CancellationToken::new(),
        };

        stream.body = Some(stream.open().await?);
        debug!(
            "Watch on {} connected at resource version {:?}",
            T::gvr().resource,
            stream.options.resource_version
        );
        Ok(stream)
    }

    /// Waits for the next event.
    ///
    /// Returns [`InformerError::Stopped`] once [`stop`](Self::stop) has been
    /// called, the decode or transport error that closed the stream, and
    /// [`InformerError::Closed`] on every call after that.
    pub async fn next(&mut self) -> Result<WatchEvent<T>, InformerError> {
        loop {
            if self.closed {
                return Err(InformerError::Closed);
            }
            if self.stop.is_cancelled() {
                self.close();
                return Err(InformerError::Stopped);
            }

            if let Some(frame) = self.take_frame() {
                return match serde_json::from_slice::<WatchEvent<T>>(&frame) {
                    Ok(event) => {
                        self.track(&event);
                        Ok(event)
                    }
                    Err(e) => {
                        warn!("Undecodable {} watch frame, closing watch: {}", T::gvr().resource, e);
                        self.close();
                        Err(e.into())
                    }
                };
            }

            let Some(body) = self.body.as_mut() else {
                self.reconnect().await?;
                continue;
            };

            let stop = self.stop.clone();
            let chunk = tokio::select! {
                biased;
                () = stop.cancelled() => Err(InformerError::Stopped),
                chunk = body.next() => Ok(chunk),
            };

            match chunk {
                Ok(Some(Ok(bytes))) => self.buffer.extend_from_slice(&bytes),
                Ok(Some(Err(e))) => {
                    warn!("Watch body for {} failed, closing watch: {}", T::gvr().resource, e);
                    self.close();
                    return Err(e.into());
                }
                Ok(None) => {
                    // A final record may arrive without its newline.
                    self.body = None;
                    if self.buffer.iter().all(u8::is_ascii_whitespace) {
                        self.buffer.clear();
                    } else {
                        self.buffer.extend_from_slice(b"\n");
                    }
                }
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            }
        }
    }

    /// Stops the stream. Idempotent; a concurrent `next` returns promptly.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Token that stops this stream when cancelled, usable from other tasks.
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Resume token the next connection would carry.
    pub fn resource_version(&self) -> Option<&str> {
        self.options.resource_version.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Request future owning its inputs, so it never borrows the stream.
    fn open(&self) -> BoxFuture<'static, Result<ByteStream, InformerError>> {
        let api = Arc::clone(&self.api);
        let namespace = self.namespace.clone();
        let name = self.name.clone();
        let options = self.options.clone();
        async move {
            let body = api.watch(namespace.as_deref(), name.as_deref(), &options).await?;
            Ok(body)
        }
        .boxed()
    }

    async fn reconnect(&mut self) -> Result<(), InformerError> {
        info!(
            "Watch on {} ended by server, reconnecting from {:?}",
            T::gvr().resource,
            self.options.resource_version
        );

        let stop = self.stop.clone();
        let opened = tokio::select! {
            biased;
            () = stop.cancelled() => Err(InformerError::Stopped),
            body = self.open() => body,
        };

        match opened {
            Ok(body) => {
                self.body = Some(body);
                Ok(())
            }
            Err(e) => {
                if !e.is_stopped() {
                    warn!("Watch reconnect for {} failed: {}", T::gvr().resource, e);
                }
                self.close();
                Err(e)
            }
        }
    }

    /// Splits the next non-blank line off the buffer.
    fn take_frame(&mut self) -> Option<BytesMut> {
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let frame = self.buffer.split_to(end + 1);
            if !frame.iter().all(u8::is_ascii_whitespace) {
                return Some(frame);
            }
        }
        None
    }

    fn track(&mut self, event: &WatchEvent<T>) {
        let version = event.object.resource_version();
        if !version.is_empty() {
            self.options.resource_version = Some(version.to_string());
        }
        if event.event_type == EventType::Error {
            warn!("Server sent an ERROR watch event for {} {}", T::gvr().resource, event.object.key());
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.body = None;
        self.buffer.clear();
    }
}

impl<T: Resource> fmt::Debug for WatchStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchStream")
            .field("resource", &T::gvr().resource)
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("resource_version", &self.options.resource_version)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
