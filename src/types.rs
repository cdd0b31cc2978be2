//! Core constants and options shared across the document model.

use serde_json::Value;

/// Version advertised in every serialized document's `jsonapi` member.
pub const JSONAPI_VERSION: &str = "1.0";

/// Top-level members a document may carry.
pub const DOCUMENT_KEYS: &[&str] = &["data", "errors", "links", "meta", "included", "jsonapi"];

/// Members a resource object may carry.
pub const RESOURCE_KEYS: &[&str] = &["id", "type", "attributes", "relationships"];

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Options controlling document assembly and serialization.
#[derive(Debug, Clone, Default)]
pub struct DocumentOptions {
    /// Prefix for synthesized self links (e.g., "https://api.example.com").
    /// Stored without a trailing slash.
    pub base_url: String,
}

impl DocumentOptions {
    /// Create options with the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Absolute URL for a resource or collection path.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_names() {
        assert_eq!(json_type_name(&json!(null)), "null");
        assert_eq!(json_type_name(&json!([1])), "array");
        assert_eq!(json_type_name(&json!({"a": 1})), "object");
    }

    #[test]
    fn document_options_trims_trailing_slash() {
        let opts = DocumentOptions::new("https://api.example.com/");
        assert_eq!(opts.base_url, "https://api.example.com");
        assert_eq!(opts.url_for("/widgets/1"), "https://api.example.com/widgets/1");

        let opts = DocumentOptions::default();
        assert_eq!(opts.url_for("/widgets"), "/widgets");
    }
}
