//! Client-side namespace and label matching.

use resources::{labels_match, LabelSelector, Resource};

/// `true` when `object` is in `namespace` (any namespace when `None` or
/// empty) and satisfies every selector.
///
/// A selector naming a label the object does not carry never matches.
pub fn matches<T: Resource>(namespace: Option<&str>, selectors: &[LabelSelector], object: &T) -> bool {
    if let Some(ns) = namespace.filter(|ns| !ns.is_empty()) {
        if object.namespace() != Some(ns) {
            return false;
        }
    }
    labels_match(selectors, object.labels())
}
