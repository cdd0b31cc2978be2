//! Loading documents and resource registries from files, strings and URLs.
//!
//! A registry file declares resource types as a JSON object keyed by type:
//!
//! ```json
//! {
//!   "widgets": {
//!     "attributes": { "name": null, "sku": "" },
//!     "readOnly": ["sku"],
//!     "relationships": { "owner": "one", "parts": "many" },
//!     "collectionPath": "/widgets"
//!   }
//! }
//! ```
//!
//! Attribute values are the defaults applied to new resources.

use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::DocumentError;
use crate::schema::{Cardinality, ResourceSchema};
use crate::types::json_type_name;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

const REGISTRY_KEYS: &[&str] = &["attributes", "readOnly", "relationships", "collectionPath"];

/// Load a raw document from a file path.
///
/// # Errors
///
/// Returns `DocumentError::FileNotFound` if the file doesn't exist,
/// or `DocumentError::InvalidJson` if the file isn't valid JSON.
pub fn load_document(path: &Path) -> Result<Value, DocumentError> {
    if !path.exists() {
        return Err(DocumentError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| DocumentError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    debug!(path = %path.display(), bytes = content.len(), "Loaded document");
    load_document_str(&content)
}

/// Load a raw document from a JSON string.
pub fn load_document_str(content: &str) -> Result<Value, DocumentError> {
    serde_json::from_str(content).map_err(|source| DocumentError::InvalidJson { source })
}

/// Load a raw document from an HTTP/HTTPS URL.
///
/// Requires the `remote` feature (enabled by default).
///
/// # Errors
///
/// Returns `DocumentError::NetworkError` if the request fails or the
/// response isn't valid JSON.
#[cfg(feature = "remote")]
pub fn load_document_url(url: &str) -> Result<Value, DocumentError> {
    let network = |source: reqwest::Error| DocumentError::NetworkError {
        url: url.to_string(),
        source,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(network)?;

    let response = client
        .get(url)
        .header("Accept", "application/vnd.api+json, application/json")
        .send()
        .map_err(network)?
        .error_for_status()
        .map_err(network)?;

    debug!(url, status = %response.status(), "Fetched document");
    response.json().map_err(network)
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Load a raw document from a file path or URL.
pub fn load_document_auto(source: &str) -> Result<Value, DocumentError> {
    if is_url(source) {
        #[cfg(feature = "remote")]
        {
            load_document_url(source)
        }
        #[cfg(not(feature = "remote"))]
        {
            Err(DocumentError::FileNotFound {
                path: std::path::PathBuf::from(source),
            })
        }
    } else {
        load_document(Path::new(source))
    }
}

/// Load a registry file and build one schema per declared type.
pub fn load_registry(path: &Path) -> Result<Vec<Arc<ResourceSchema>>, DocumentError> {
    let value = load_document(path)?;
    registry_from_value(&value)
}

pub fn load_registry_str(content: &str) -> Result<Vec<Arc<ResourceSchema>>, DocumentError> {
    registry_from_value(&load_document_str(content)?)
}

/// Build schemas from an already-parsed registry.
///
/// # Errors
///
/// Returns `DocumentError::InvalidRegistry` naming the offending type for
/// unknown keys, bad cardinalities, read-only names that are not declared
/// attributes, and attribute/relationship name clashes.
pub fn registry_from_value(value: &Value) -> Result<Vec<Arc<ResourceSchema>>, DocumentError> {
    let Value::Object(types) = value else {
        return Err(DocumentError::InvalidSection {
            section: "registry",
            expected: "object",
            actual: json_type_name(value).to_string(),
        });
    };

    types
        .iter()
        .map(|(resource_type, entry)| schema_from_entry(resource_type, entry))
        .collect()
}

fn schema_from_entry(resource_type: &str, entry: &Value) -> Result<Arc<ResourceSchema>, DocumentError> {
    let invalid = |message: String| DocumentError::InvalidRegistry {
        resource_type: resource_type.to_string(),
        message,
    };

    let Value::Object(entry) = entry else {
        return Err(invalid(format!("expected object, got {}", json_type_name(entry))));
    };

    let unknown: Vec<&str> = entry
        .keys()
        .map(String::as_str)
        .filter(|k| !REGISTRY_KEYS.contains(k))
        .collect();
    if !unknown.is_empty() {
        return Err(invalid(format!("unrecognized key(s) {}", unknown.join(", "))));
    }

    let empty = Map::new();
    let attributes = match entry.get("attributes") {
        None => &empty,
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(invalid(format!(
                "attributes must be an object, got {}",
                json_type_name(other)
            )))
        }
    };

    let read_only: Vec<&str> = match entry.get("readOnly") {
        None => Vec::new(),
        Some(Value::Array(names)) => names
            .iter()
            .map(|n| n.as_str().ok_or_else(|| invalid("readOnly entries must be strings".into())))
            .collect::<Result<_, _>>()?,
        Some(other) => {
            return Err(invalid(format!(
                "readOnly must be an array, got {}",
                json_type_name(other)
            )))
        }
    };
    if let Some(name) = read_only.iter().find(|n| !attributes.contains_key(**n)) {
        return Err(invalid(format!("read-only '{name}' is not a declared attribute")));
    }

    let mut builder = ResourceSchema::builder(resource_type);
    for (name, default) in attributes {
        builder = if read_only.contains(&name.as_str()) {
            builder.read_only_attribute(name.as_str(), default.clone())
        } else {
            builder.attribute(name.as_str(), default.clone())
        };
    }

    match entry.get("relationships") {
        None => {}
        Some(Value::Object(rels)) => {
            for (name, cardinality) in rels {
                let cardinality = match cardinality.as_str() {
                    Some("one") => Cardinality::ToOne,
                    Some("many") => Cardinality::ToMany,
                    _ => {
                        return Err(invalid(format!(
                            "relationship '{name}' must be \"one\" or \"many\""
                        )))
                    }
                };
                builder = builder.relationship(name.as_str(), cardinality);
            }
        }
        Some(other) => {
            return Err(invalid(format!(
                "relationships must be an object, got {}",
                json_type_name(other)
            )))
        }
    }

    match entry.get("collectionPath") {
        None => {}
        Some(Value::String(path)) => builder = builder.collection_path(path.as_str()),
        Some(other) => {
            return Err(invalid(format!(
                "collectionPath must be a string, got {}",
                json_type_name(other)
            )))
        }
    }

    builder.build().map_err(|e| invalid(e.to_string()))
}
