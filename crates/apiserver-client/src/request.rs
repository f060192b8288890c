//! Request description and URL construction.

use reqwest::Method;
use resources::{GroupVersionResource, ListOptions};

/// Request body encodings understood by the API server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Json,
    MergePatch,
    ApplyPatch,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
            ContentType::MergePatch => "application/merge-patch+json",
            ContentType::ApplyPatch => "application/apply-patch+yaml",
        }
    }
}

/// Everything needed to issue one API request.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub gvr: GroupVersionResource,
    pub verb: Method,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub subresource: Option<String>,
    pub query: Vec<(String, String)>,
    pub content_type: Option<ContentType>,
    pub body: Option<Vec<u8>>,
}

impl ResourceRequest {
    pub fn new(gvr: GroupVersionResource, verb: Method) -> Self {
        Self {
            gvr,
            verb,
            namespace: None,
            name: None,
            subresource: None,
            query: Vec::new(),
            content_type: None,
            body: None,
        }
    }

    #[must_use]
    pub fn namespace(mut self, namespace: Option<&str>) -> Self {
        self.namespace = namespace.filter(|ns| !ns.is_empty()).map(str::to_string);
        self
    }

    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn subresource(mut self, subresource: Option<&str>) -> Self {
        self.subresource = subresource.map(str::to_string);
        self
    }

    #[must_use]
    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn body(mut self, content_type: ContentType, body: Vec<u8>) -> Self {
        self.content_type = Some(content_type);
        self.body = Some(body);
        self
    }

    /// Adds selector and resume-token parameters from list options.
    #[must_use]
    pub fn list_options(mut self, options: &ListOptions) -> Self {
        for selector in &options.label_selector {
            self = self.query("labelSelector", &selector.to_query_value());
        }
        if let Some(field_selector) = &options.field_selector {
            self = self.query("fieldSelector", field_selector);
        }
        if let Some(version) = options.resource_version.as_deref().filter(|v| !v.is_empty()) {
            self = self.query("resourceVersion", version);
        }
        self
    }

    /// Path without the query string.
    pub fn path(&self) -> String {
        let mut path = self.gvr.collection_path(self.namespace.as_deref());
        if let Some(name) = &self.name {
            path.push('/');
            path.push_str(name);
        }
        if let Some(subresource) = &self.subresource {
            path.push('/');
            path.push_str(subresource);
        }
        path
    }

    /// Path and encoded query string.
    pub fn url(&self) -> String {
        let path = self.path();
        if self.query.is_empty() {
            return path;
        }

        let query = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{path}?{query}")
    }
}
