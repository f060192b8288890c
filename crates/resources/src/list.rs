//! List responses.

use crate::meta::ListMeta;
use serde::{Deserialize, Serialize};

/// A collection snapshot returned by a list request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: Deserialize<'de>"))]
pub struct ObjectList<T> {
    #[serde(default)]
    pub metadata: ListMeta,

    #[serde(default)]
    pub items: Vec<T>,
}

impl<T> ObjectList<T> {
    pub fn new(items: Vec<T>, resource_version: impl Into<String>) -> Self {
        Self {
            metadata: ListMeta {
                resource_version: Some(resource_version.into()),
                continue_token: None,
            },
            items,
        }
    }

    /// The collection-level resume token, if the server sent one.
    pub fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }
}

impl<T> Default for ObjectList<T> {
    fn default() -> Self {
        Self {
            metadata: ListMeta::default(),
            items: Vec::new(),
        }
    }
}
