use std::collections::BTreeMap;
use uuid::Uuid;

/// Per-request metadata handed to every collaborator and the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMeta {
    pub request_id: Uuid,
    pub attributes: BTreeMap<String, String>,
}

impl RequestMeta {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

impl Default for RequestMeta {
    fn default() -> Self {
        Self::new()
    }
}
