//! Object access served from a resource cache.
//!
//! Reads (`get`, `list`, `watch`) are answered locally from a
//! [`ResourceCache`], with namespace and label selectors evaluated on the
//! client. Writes go straight to the wrapped API; their effect shows up in
//! the cache once the server reports it on the watch.

use crate::cache::ResourceCache;
use crate::error::InformerError;
use crate::filtered_view::FilteredView;
use apiserver_client::ObjectApi;
use resources::{object_key, EventType, ListOptions, Resource};
use std::fmt;
use std::sync::Arc;

pub struct CachedApi<T: Resource> {
    api: Arc<dyn ObjectApi<T>>,
    cache: Arc<ResourceCache<T>>,
}

impl<T: Resource> Clone for CachedApi<T> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<T: Resource> CachedApi<T> {
    /// Builds the cache for `namespace` (all namespaces when `None`) and
    /// wraps `api`.
    pub async fn new(
        api: Arc<dyn ObjectApi<T>>,
        namespace: Option<&str>,
        options: ListOptions,
    ) -> Result<Self, InformerError> {
        let cache = ResourceCache::new(Arc::clone(&api), namespace, options).await?;
        Ok(Self {
            api,
            cache: Arc::new(cache),
        })
    }

    /// Wraps an existing cache.
    pub fn from_cache(api: Arc<dyn ObjectApi<T>>, cache: Arc<ResourceCache<T>>) -> Self {
        Self { api, cache }
    }

    pub fn cache(&self) -> &Arc<ResourceCache<T>> {
        &self.cache
    }

    pub fn get(&self, namespace: Option<&str>, name: &str) -> Result<T, InformerError> {
        let key = object_key(namespace, name);
        self.cache.get(&key).ok_or(InformerError::NotFound(key))
    }

    pub fn list(&self, namespace: Option<&str>, options: &ListOptions) -> Vec<T> {
        self.cache.list_matching(namespace, &options.label_selector)
    }

    /// Live view of matching objects: current ones as `Added`, then changes.
    pub fn watch(&self, namespace: Option<&str>, options: &ListOptions) -> FilteredView<T> {
        self.cache.watch(namespace, options.label_selector.clone())
    }

    pub async fn create(&self, namespace: Option<&str>, object: &T) -> Result<T, InformerError> {
        Ok(self.api.create(namespace, object).await?)
    }

    pub async fn patch(&self, namespace: Option<&str>, name: &str, field_manager: &str, object: &T) -> Result<T, InformerError> {
        Ok(self.api.patch(namespace, name, field_manager, object).await?)
    }

    pub async fn apply(
        &self,
        namespace: Option<&str>,
        name: &str,
        field_manager: &str,
        force: bool,
        object: &T,
    ) -> Result<(T, EventType), InformerError> {
        Ok(self.api.apply(namespace, name, field_manager, force, object).await?)
    }

    pub async fn delete(&self, namespace: Option<&str>, name: &str, force: bool) -> Result<T, InformerError> {
        Ok(self.api.delete(namespace, name, force).await?)
    }

    /// Same cache, writes sent through `api` instead, e.g. the `status`
    /// subresource of the same kind.
    pub fn with_api(&self, api: Arc<dyn ObjectApi<T>>) -> Self {
        Self {
            api,
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<T: Resource> fmt::Debug for CachedApi<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedApi").field("cache", &self.cache).finish_non_exhaustive()
    }
}
