//! Problem reports carried in a document's `errors` member.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::collections::{Meta, Sequence};
use crate::error::ResourceError;
use crate::link::LinksCollection;
use crate::types::json_type_name;

const ERROR_KEYS: &[&str] = &["status", "title", "detail", "code", "source", "links", "meta"];

/// Ordered list of error objects.
pub type ErrorsCollection = Sequence<ErrorObject>;

/// Pointer to the part of the request an error refers to.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
}

/// One problem report. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorObject {
    status: u16,
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<ErrorSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    links: Option<LinksCollection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<Meta>,
}

impl ErrorObject {
    /// Create an error with the two required members.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::InvalidErrorObject` if `status` is outside
    /// 100..=599 or `title` is empty.
    pub fn new(status: u16, title: impl Into<String>) -> Result<Self, ResourceError> {
        let title = title.into();
        let mut problems = Vec::new();
        if !(100..=599).contains(&status) {
            problems.push(format!("status {status} is outside 100..=599"));
        }
        if title.is_empty() {
            problems.push("title must not be empty".to_string());
        }
        if !problems.is_empty() {
            return Err(ResourceError::InvalidErrorObject { problems });
        }
        Ok(Self {
            status,
            title,
            detail: None,
            code: None,
            source: None,
            links: None,
            meta: None,
        })
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_source(mut self, source: ErrorSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Shorthand for a source pointing at `/data/attributes/<field>`-style paths.
    pub fn with_pointer(self, pointer: impl Into<String>) -> Self {
        self.with_source(ErrorSource {
            pointer: Some(pointer.into()),
            parameter: None,
        })
    }

    pub fn with_links(mut self, links: LinksCollection) -> Self {
        self.links = Some(links);
        self
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Parse an error object, collecting every problem before failing.
    ///
    /// `status` may be given as an integer or a numeric string.
    pub fn from_value(value: &Value) -> Result<Self, ResourceError> {
        let Value::Object(map) = value else {
            return Err(ResourceError::InvalidErrorObject {
                problems: vec![format!("expected object, got {}", json_type_name(value))],
            });
        };

        let mut problems = Vec::new();

        let unknown: Vec<&str> = map
            .keys()
            .map(String::as_str)
            .filter(|k| !ERROR_KEYS.contains(k))
            .collect();
        if !unknown.is_empty() {
            problems.push(format!("unrecognized key(s) {}", unknown.join(", ")));
        }

        let status = match map.get("status") {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.parse::<u64>().ok(),
            Some(_) | None => None,
        };
        let status = match status {
            Some(s) if (100..=599).contains(&s) => Some(s as u16),
            Some(s) => {
                problems.push(format!("status {s} is outside 100..=599"));
                None
            }
            None => {
                problems.push("status is required and must be an integer".to_string());
                None
            }
        };

        let title = match map.get("title") {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => {
                problems.push("title is required and must be a non-empty string".to_string());
                None
            }
        };

        let detail = optional_string(map, "detail", &mut problems);
        let code = optional_string(map, "code", &mut problems);

        let source = match map.get("source") {
            None => None,
            Some(Value::Object(src)) => Some(ErrorSource {
                pointer: src.get("pointer").and_then(Value::as_str).map(String::from),
                parameter: src.get("parameter").and_then(Value::as_str).map(String::from),
            }),
            Some(other) => {
                problems.push(format!("source must be an object, got {}", json_type_name(other)));
                None
            }
        };

        let links = match map.get("links") {
            None => None,
            Some(v) => match LinksCollection::from_value(v) {
                Ok(links) => Some(links),
                Err(e) => {
                    problems.push(e.to_string());
                    None
                }
            },
        };

        let meta = match map.get("meta") {
            None => None,
            Some(v) => match Meta::from_value(v) {
                Ok(meta) => Some(meta),
                Err(e) => {
                    problems.push(e.to_string());
                    None
                }
            },
        };

        match (status, title) {
            (Some(status), Some(title)) if problems.is_empty() => Ok(Self {
                status,
                title,
                detail,
                code,
                source,
                links,
                meta,
            }),
            _ => Err(ResourceError::InvalidErrorObject { problems }),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn source(&self) -> Option<&ErrorSource> {
        self.source.as_ref()
    }

    pub fn links(&self) -> Option<&LinksCollection> {
        self.links.as_ref()
    }

    pub fn meta(&self) -> Option<&Meta> {
        self.meta.as_ref()
    }
}

fn optional_string(
    map: &Map<String, Value>,
    key: &str,
    problems: &mut Vec<String>,
) -> Option<String> {
    match map.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            problems.push(format!("{key} must be a string, got {}", json_type_name(other)));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_requires_valid_status_and_title() {
        assert!(ErrorObject::new(422, "Invalid attribute").is_ok());
        assert!(ErrorObject::new(42, "Too low").is_err());
        match ErrorObject::new(600, "") {
            Err(ResourceError::InvalidErrorObject { problems }) => assert_eq!(problems.len(), 2),
            other => panic!("expected two problems, got {other:?}"),
        }
    }

    #[test]
    fn from_value_collects_every_problem() {
        let raw = json!({"status": 999, "colour": "red", "shape": "round"});
        match ErrorObject::from_value(&raw) {
            Err(ResourceError::InvalidErrorObject { problems }) => {
                assert_eq!(problems.len(), 3);
                assert!(problems[0].contains("colour, shape"));
            }
            other => panic!("expected InvalidErrorObject, got {other:?}"),
        }
    }

    #[test]
    fn from_value_accepts_string_status() {
        let err = ErrorObject::from_value(&json!({"status": "404", "title": "Not Found"})).unwrap();
        assert_eq!(err.status(), 404);
    }

    #[test]
    fn serializes_only_present_members() {
        let err = ErrorObject::new(400, "Bad Request")
            .unwrap()
            .with_detail("name is too long")
            .with_pointer("/data/attributes/name");
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({
                "status": 400,
                "title": "Bad Request",
                "detail": "name is too long",
                "source": {"pointer": "/data/attributes/name"}
            })
        );
    }
}
