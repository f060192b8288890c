//! The capability every watched kind implements.
//!
//! Cache, queue and controller code is written once against [`Resource`];
//! concrete kinds only expose their metadata and where they live on the
//! API server.

use crate::key::object_key;
use crate::meta::ObjectMeta;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Group, version and plural resource name of a kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupVersionResource {
    /// API group; empty for the core group
    pub group: String,
    pub version: String,
    /// Plural resource name (e.g., "configmaps")
    pub resource: String,
}

impl GroupVersionResource {
    pub fn new(group: &str, version: &str, resource: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
        }
    }

    /// Core group (`/api/v1`) resource.
    pub fn core(resource: &str) -> Self {
        Self::new("", "v1", resource)
    }

    /// Path prefix of the group/version, e.g. `/api/v1` or `/apis/apps/v1`.
    #[must_use]
    pub fn api_prefix(&self) -> String {
        if self.group.is_empty() {
            format!("/api/{}", self.version)
        } else {
            format!("/apis/{}/{}", self.group, self.version)
        }
    }

    /// Collection path, scoped to a namespace when one is given.
    #[must_use]
    pub fn collection_path(&self, namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) if !ns.is_empty() => {
                format!("{}/namespaces/{}/{}", self.api_prefix(), ns, self.resource)
            }
            _ => format!("{}/{}", self.api_prefix(), self.resource),
        }
    }
}

/// A kind that can be listed, watched and cached.
pub trait Resource: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Where the kind lives on the API server.
    fn gvr() -> GroupVersionResource;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn name(&self) -> &str {
        &self.meta().name
    }

    fn namespace(&self) -> Option<&str> {
        self.meta().namespace.as_deref()
    }

    fn labels(&self) -> &BTreeMap<String, String> {
        &self.meta().labels
    }

    /// Resume token of this object; empty when the server did not set one.
    fn resource_version(&self) -> &str {
        self.meta().resource_version.as_deref().unwrap_or_default()
    }

    /// Identity key (`namespace/name` or `name`).
    fn key(&self) -> String {
        object_key(self.namespace(), self.name())
    }
}
