//! Watch events.
//!
//! A watch response body is a sequence of `{"type": ..., "object": ...}`
//! records. Only the four known types are accepted; anything else fails to
//! decode.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of change a watch event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Added,
    Modified,
    Deleted,
    Error,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::Added => "ADDED",
            EventType::Modified => "MODIFIED",
            EventType::Deleted => "DELETED",
            EventType::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// A single change to a watched object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent<T> {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub object: T,
}

impl<T> WatchEvent<T> {
    pub fn new(event_type: EventType, object: T) -> Self {
        Self { event_type, object }
    }

    pub fn added(object: T) -> Self {
        Self::new(EventType::Added, object)
    }

    pub fn modified(object: T) -> Self {
        Self::new(EventType::Modified, object)
    }

    pub fn deleted(object: T) -> Self {
        Self::new(EventType::Deleted, object)
    }

    /// `true` for events that remove the object from a mirror.
    pub fn is_delete(&self) -> bool {
        self.event_type == EventType::Deleted
    }
}
