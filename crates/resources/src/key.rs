//! Identity keys.
//!
//! Objects are indexed by `namespace/name`, or by `name` alone for
//! cluster-scoped objects. The same key type is used by the cache and the
//! work queue.

/// Builds the identity key for an object.
#[must_use]
pub fn object_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{ns}/{name}"),
        _ => name.to_string(),
    }
}

/// Splits a key back into its namespace and name.
///
/// The namespace is `None` for cluster-scoped keys.
#[must_use]
pub fn split_key(key: &str) -> (Option<&str>, &str) {
    match key.split_once('/') {
        Some((ns, name)) => (Some(ns), name),
        None => (None, key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaced_key() {
        assert_eq!(object_key(Some("default"), "web"), "default/web");
        assert_eq!(split_key("default/web"), (Some("default"), "web"));
    }

    #[test]
    fn test_cluster_scoped_key() {
        assert_eq!(object_key(None, "node-1"), "node-1");
        assert_eq!(object_key(Some(""), "node-1"), "node-1");
        assert_eq!(split_key("node-1"), (None, "node-1"));
    }
}
