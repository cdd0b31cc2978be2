//! Named hyperlinks and the links collection.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::collections::{Meta, Named, NamedRegistry};
use crate::error::ResourceError;
use crate::types::json_type_name;

/// A hyperlink with optional metadata.
///
/// Serializes as a bare href string, or as `{href, meta}` when metadata is set.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    name: Option<String>,
    href: String,
    meta: Option<Meta>,
}

/// Links keyed by link name ("self", "related", ...).
pub type LinksCollection = NamedRegistry<Link>;

impl Link {
    pub fn new(name: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            href: href.into(),
            meta: None,
        }
    }

    /// A link not yet attached to a name. Cannot be serialized inside a
    /// `LinksCollection` until named.
    pub fn unnamed(href: impl Into<String>) -> Self {
        Self {
            name: None,
            href: href.into(),
            meta: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Parse either a bare href string or a `{href, meta}` link object.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::InvalidLink` listing every problem found.
    pub fn from_value(name: &str, value: &Value) -> Result<Self, ResourceError> {
        let invalid = |message: String| ResourceError::InvalidLink {
            name: name.to_string(),
            message,
        };

        match value {
            Value::String(href) => Ok(Link::new(name, href.as_str())),
            Value::Object(map) => {
                let mut problems = Vec::new();
                let unknown: Vec<&str> = map
                    .keys()
                    .map(String::as_str)
                    .filter(|k| *k != "href" && *k != "meta")
                    .collect();
                if !unknown.is_empty() {
                    problems.push(format!("unrecognized key(s) {}", unknown.join(", ")));
                }

                let href = match map.get("href") {
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(other) => {
                        problems.push(format!("href must be a string, got {}", json_type_name(other)));
                        None
                    }
                    None => {
                        problems.push("missing href".to_string());
                        None
                    }
                };

                let meta = match map.get("meta") {
                    Some(v) => match Meta::from_value(v) {
                        Ok(meta) => Some(meta),
                        Err(e) => {
                            problems.push(e.to_string());
                            None
                        }
                    },
                    None => None,
                };

                match href {
                    Some(href) if problems.is_empty() => {
                        let link = Link::new(name, href);
                        Ok(match meta {
                            Some(meta) => link.with_meta(meta),
                            None => link,
                        })
                    }
                    _ => Err(invalid(problems.join("; "))),
                }
            }
            other => Err(invalid(format!(
                "expected string or object, got {}",
                json_type_name(other)
            ))),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn href(&self) -> &str {
        &self.href
    }

    pub fn meta(&self) -> Option<&Meta> {
        self.meta.as_ref()
    }
}

impl Named for Link {
    fn member_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl Serialize for Link {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.meta {
            None => serializer.serialize_str(&self.href),
            Some(meta) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("href", &self.href)?;
                map.serialize_entry("meta", meta)?;
                map.end()
            }
        }
    }
}

impl NamedRegistry<Link> {
    /// Build from a JSON object of `name -> href | link object`.
    /// `null` links are skipped.
    pub fn from_value(value: &Value) -> Result<Self, ResourceError> {
        let Value::Object(map) = value else {
            return Err(ResourceError::InvalidLink {
                name: "links".into(),
                message: format!("expected object, got {}", json_type_name(value)),
            });
        };

        let mut links = Self::new();
        for (name, raw) in map {
            if raw.is_null() {
                continue;
            }
            links.add(Link::from_value(name, raw)?)?;
        }
        Ok(links)
    }

    /// Insert a link under its own name (or the next auto key when unnamed).
    pub fn add(&mut self, link: Link) -> Result<(), ResourceError> {
        match link.name.clone() {
            Some(name) => self.insert(name, link),
            None => self.push(link),
        }
    }
}
