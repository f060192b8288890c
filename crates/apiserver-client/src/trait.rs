//! ObjectApi trait for mocking
//!
//! This trait abstracts typed access to one resource kind so the informer can
//! be driven by the real [`Api`](crate::Api) or by an in-memory mock.

use crate::error::ClientError;
use bytes::Bytes;
use futures::stream::BoxStream;
use resources::{EventType, ListOptions, ObjectList, Resource};

/// Raw body of a watch response, chunked as it arrives.
pub type ByteStream = BoxStream<'static, Result<Bytes, ClientError>>;

/// Typed operations on one resource kind.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ObjectApi<T: Resource>: Send + Sync {
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<T, ClientError>;

    /// Lists the collection. The returned list carries the resume token for a
    /// follow-up watch.
    async fn list(&self, namespace: Option<&str>, options: &ListOptions) -> Result<ObjectList<T>, ClientError>;

    /// Opens a watch and returns the undecoded response body.
    ///
    /// Watch is collection-scoped; a `name` narrows it with a field selector.
    async fn watch(
        &self,
        namespace: Option<&str>,
        name: Option<&str>,
        options: &ListOptions,
    ) -> Result<ByteStream, ClientError>;

    async fn create(&self, namespace: Option<&str>, object: &T) -> Result<T, ClientError>;

    /// JSON merge patch.
    async fn patch(&self, namespace: Option<&str>, name: &str, field_manager: &str, object: &T) -> Result<T, ClientError>;

    /// Server-side apply. Reports whether the object was created or modified.
    async fn apply(
        &self,
        namespace: Option<&str>,
        name: &str,
        field_manager: &str,
        force: bool,
        object: &T,
    ) -> Result<(T, EventType), ClientError>;

    async fn delete(&self, namespace: Option<&str>, name: &str, force: bool) -> Result<T, ClientError>;
}
