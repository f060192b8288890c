//! Label selectors and list options.
//!
//! Selectors are sent to the server as repeated `labelSelector` query
//! parameters and are also evaluated locally against cached objects.

use std::collections::BTreeMap;
use std::fmt;

/// Comparison applied by a [`LabelSelector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals,
    NotEquals,
    /// Raw string comparison of the label value
    LessThan,
    /// Raw string comparison of the label value
    GreaterThan,
    /// Key presence only; the selector value is ignored
    Exists,
}

impl Operator {
    fn symbol(self) -> &'static str {
        match self {
            Operator::Equals => "=",
            Operator::NotEquals => "!=",
            Operator::LessThan => "<",
            Operator::GreaterThan => ">",
            Operator::Exists => "",
        }
    }
}

/// One requirement on an object's labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabelSelector {
    pub label: String,
    pub operator: Operator,
    pub value: String,
}

impl LabelSelector {
    pub fn new(label: impl Into<String>, operator: Operator, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn equals(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(label, Operator::Equals, value)
    }

    pub fn not_equals(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(label, Operator::NotEquals, value)
    }

    pub fn exists(label: impl Into<String>) -> Self {
        Self::new(label, Operator::Exists, String::new())
    }

    /// Evaluates the selector against a label set.
    ///
    /// A missing label fails every operator, `Exists` included.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let Some(value) = labels.get(&self.label) else {
            return false;
        };

        match self.operator {
            Operator::Equals => *value == self.value,
            Operator::NotEquals => *value != self.value,
            Operator::LessThan => value.as_str() < self.value.as_str(),
            Operator::GreaterThan => value.as_str() > self.value.as_str(),
            Operator::Exists => true,
        }
    }

    /// Value of the `labelSelector` query parameter, e.g. `app!=web`.
    #[must_use]
    pub fn to_query_value(&self) -> String {
        match self.operator {
            Operator::Exists => self.label.clone(),
            op => format!("{}{}{}", self.label, op.symbol(), self.value),
        }
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query_value())
    }
}

/// `true` when every selector matches.
#[must_use]
pub fn labels_match(selectors: &[LabelSelector], labels: &BTreeMap<String, String>) -> bool {
    selectors.iter().all(|selector| selector.matches(labels))
}

/// Options for list and watch requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub label_selector: Vec<LabelSelector>,

    /// Raw field selector (e.g., `metadata.name=web`)
    pub field_selector: Option<String>,

    /// Resume token; a watch starts strictly after this version
    pub resource_version: Option<String>,
}

impl ListOptions {
    #[must_use]
    pub fn with_selector(mut self, selector: LabelSelector) -> Self {
        self.label_selector.push(selector);
        self
    }

    #[must_use]
    pub fn with_resource_version(mut self, version: impl Into<String>) -> Self {
        self.resource_version = Some(version.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_equals_selector() {
        let selector = LabelSelector::equals("app", "foo");

        assert!(selector.matches(&labels(&[("app", "foo"), ("tier", "web")])));
        assert!(!selector.matches(&labels(&[("app", "bar")])));
        assert!(!selector.matches(&labels(&[("tier", "web")])));
    }

    #[test]
    fn test_missing_label_fails_every_operator() {
        let empty = labels(&[]);
        for op in [
            Operator::Equals,
            Operator::NotEquals,
            Operator::LessThan,
            Operator::GreaterThan,
            Operator::Exists,
        ] {
            assert!(!LabelSelector::new("app", op, "x").matches(&empty), "{op:?}");
        }
    }

    #[test]
    fn test_ordering_operators_compare_strings() {
        let set = labels(&[("rank", "10")]);

        // "10" < "9" as strings
        assert!(LabelSelector::new("rank", Operator::LessThan, "9").matches(&set));
        assert!(!LabelSelector::new("rank", Operator::GreaterThan, "9").matches(&set));
    }

    #[test]
    fn test_not_equals_and_exists() {
        let set = labels(&[("app", "foo")]);

        assert!(LabelSelector::not_equals("app", "bar").matches(&set));
        assert!(!LabelSelector::not_equals("app", "foo").matches(&set));
        assert!(LabelSelector::exists("app").matches(&set));
    }

    #[test]
    fn test_all_selectors_must_match() {
        let set = labels(&[("app", "foo"), ("tier", "web")]);
        let selectors = vec![LabelSelector::equals("app", "foo"), LabelSelector::exists("tier")];

        assert!(labels_match(&selectors, &set));
        assert!(labels_match(&[], &set));
        assert!(!labels_match(
            &[LabelSelector::equals("app", "foo"), LabelSelector::equals("tier", "db")],
            &set
        ));
    }

    #[test]
    fn test_query_values() {
        assert_eq!(LabelSelector::equals("app", "foo").to_query_value(), "app=foo");
        assert_eq!(LabelSelector::not_equals("app", "foo").to_query_value(), "app!=foo");
        assert_eq!(LabelSelector::new("n", Operator::LessThan, "5").to_query_value(), "n<5");
        assert_eq!(LabelSelector::new("n", Operator::GreaterThan, "5").to_query_value(), "n>5");
        assert_eq!(LabelSelector::exists("app").to_query_value(), "app");
    }
}
