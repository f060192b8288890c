//! Typed API for one resource kind.

use crate::api_trait::{ByteStream, ObjectApi};
use crate::client::HttpClient;
use crate::error::ClientError;
use crate::request::{ContentType, ResourceRequest};
use futures::{StreamExt, TryStreamExt};
use reqwest::Method;
use resources::{EventType, ListOptions, ObjectList, Resource};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// [`ObjectApi`] over HTTP.
pub struct Api<T> {
    client: Arc<HttpClient>,
    subresource: Option<String>,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Resource> Api<T> {
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self {
            client,
            subresource: None,
            _kind: PhantomData,
        }
    }

    /// Same kind, addressing a subresource of each object.
    #[must_use]
    pub fn subresource(&self, subresource: &str) -> Self {
        Self {
            client: Arc::clone(&self.client),
            subresource: Some(subresource.to_string()),
            _kind: PhantomData,
        }
    }

    /// The `status` subresource.
    #[must_use]
    pub fn status(&self) -> Self {
        self.subresource("status")
    }

    fn request(&self, verb: Method, namespace: Option<&str>) -> ResourceRequest {
        ResourceRequest::new(T::gvr(), verb)
            .namespace(namespace)
            .subresource(self.subresource.as_deref())
    }

    fn patch_request(
        &self,
        namespace: Option<&str>,
        name: &str,
        field_manager: &str,
        force: bool,
        content_type: ContentType,
        object: &T,
    ) -> Result<ResourceRequest, ClientError> {
        let mut request = self
            .request(Method::PATCH, namespace)
            .name(name)
            .query("fieldManager", field_manager)
            .body(content_type, serde_json::to_vec(object)?);
        if force {
            request = request.query("force", "true");
        }
        Ok(request)
    }
}

impl<T> Clone for Api<T> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            subresource: self.subresource.clone(),
            _kind: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Api<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Api")
            .field("kind", &std::any::type_name::<T>())
            .field("subresource", &self.subresource)
            .finish()
    }
}

#[async_trait::async_trait]
impl<T: Resource> ObjectApi<T> for Api<T> {
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<T, ClientError> {
        let request = self.request(Method::GET, namespace).name(name);
        let (object, _) = self.client.send_json(request).await?;
        Ok(object)
    }

    async fn list(&self, namespace: Option<&str>, options: &ListOptions) -> Result<ObjectList<T>, ClientError> {
        let request = self
            .request(Method::GET, namespace)
            .subresource(None)
            .list_options(options);
        let (list, _) = self.client.send_json::<ObjectList<T>>(request).await?;
        debug!(
            "Listed {} {} at resourceVersion {:?}",
            list.items.len(),
            T::gvr().resource,
            list.resource_version()
        );
        Ok(list)
    }

    async fn watch(
        &self,
        namespace: Option<&str>,
        name: Option<&str>,
        options: &ListOptions,
    ) -> Result<ByteStream, ClientError> {
        let mut options = options.clone();
        if let Some(name) = name {
            options.field_selector = Some(format!("metadata.name={name}"));
        }
        let request = self
            .request(Method::GET, namespace)
            .subresource(None)
            .query("watch", "1")
            .list_options(&options);

        let response = self.client.send(request).await?;
        Ok(response
            .bytes_stream()
            .map_err(|e| ClientError::Stream(e.to_string()))
            .boxed())
    }

    async fn create(&self, namespace: Option<&str>, object: &T) -> Result<T, ClientError> {
        let request = self
            .request(Method::POST, namespace)
            .body(ContentType::Json, serde_json::to_vec(object)?);
        let (created, _) = self.client.send_json(request).await?;
        Ok(created)
    }

    async fn patch(&self, namespace: Option<&str>, name: &str, field_manager: &str, object: &T) -> Result<T, ClientError> {
        let request = self.patch_request(namespace, name, field_manager, false, ContentType::MergePatch, object)?;
        let (patched, _) = self.client.send_json(request).await?;
        Ok(patched)
    }

    async fn apply(
        &self,
        namespace: Option<&str>,
        name: &str,
        field_manager: &str,
        force: bool,
        object: &T,
    ) -> Result<(T, EventType), ClientError> {
        let request = self.patch_request(namespace, name, field_manager, force, ContentType::ApplyPatch, object)?;
        let (applied, code) = self.client.send_json(request).await?;
        let event_type = if code == 201 {
            EventType::Added
        } else {
            EventType::Modified
        };
        Ok((applied, event_type))
    }

    async fn delete(&self, namespace: Option<&str>, name: &str, force: bool) -> Result<T, ClientError> {
        let mut request = self.request(Method::DELETE, namespace).name(name);
        if force {
            request = request.query("gracePeriodSeconds", "0");
        }
        let (deleted, _) = self.client.send_json(request).await?;
        Ok(deleted)
    }
}
