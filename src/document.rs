//! The top-level document envelope.
//!
//! A document carries either primary data or errors, plus optional links and
//! meta. When errors are present, `data` is never serialized.

use serde_json::{Map, Value};

use crate::collections::Meta;
use crate::error::DocumentError;
use crate::error_model::{ErrorObject, ErrorsCollection};
use crate::factory::ResourceFactory;
use crate::link::{Link, LinksCollection};
use crate::resource::{Resource, ResourceCollection};
use crate::types::{json_type_name, DocumentOptions, DOCUMENT_KEYS, JSONAPI_VERSION};

/// Primary data: one resource or a collection. Absent data serializes as null.
#[derive(Debug)]
pub enum PrimaryData {
    Single(Resource),
    Many(ResourceCollection),
}

#[derive(Debug, Default)]
pub struct Document {
    data: Option<PrimaryData>,
    errors: Option<ErrorsCollection>,
    links: Option<LinksCollection>,
    meta: Option<Meta>,
    included: Option<ResourceCollection>,
    options: DocumentOptions,
}

impl Document {
    pub fn new(options: DocumentOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Build a document from its JSON form.
    ///
    /// Every section is optional. Resources are built through `factory`, so
    /// each `type` must be registered there.
    ///
    /// # Errors
    ///
    /// Unrecognized top-level members are all reported together as
    /// `DocumentError::MalformedInput`.
    pub fn from_value(value: &Value, factory: &ResourceFactory) -> Result<Self, DocumentError> {
        let Value::Object(map) = value else {
            return Err(invalid_section("document", "object", value));
        };

        let unknown: Vec<String> = map
            .keys()
            .filter(|k| !DOCUMENT_KEYS.contains(&k.as_str()))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(DocumentError::MalformedInput { keys: unknown });
        }

        let mut document = Document::new(factory.options().clone());

        if let Some(errors) = map.get("errors") {
            let Value::Array(items) = errors else {
                return Err(invalid_section("errors", "array", errors));
            };
            let errors = items
                .iter()
                .map(ErrorObject::from_value)
                .collect::<Result<ErrorsCollection, _>>()?;
            document.errors = Some(errors);
        }

        if let Some(data) = map.get("data") {
            document.data = match data {
                Value::Null => None,
                Value::Object(_) => Some(PrimaryData::Single(factory.resource_from_value(data)?)),
                Value::Array(items) => Some(PrimaryData::Many(resources_from_values(items, factory)?)),
                other => return Err(invalid_section("data", "object, array or null", other)),
            };
        }

        if let Some(links) = map.get("links") {
            document.links = Some(LinksCollection::from_value(links)?);
        }

        if let Some(meta) = map.get("meta") {
            document.meta = Some(Meta::from_value(meta)?);
        }

        if let Some(included) = map.get("included") {
            let Value::Array(items) = included else {
                return Err(invalid_section("included", "array", included));
            };
            document.included = Some(resources_from_values(items, factory)?);
        }

        Ok(document)
    }

    pub fn with_data(mut self, data: PrimaryData) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_errors(mut self, errors: ErrorsCollection) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn set_data(&mut self, data: Option<PrimaryData>) {
        self.data = data;
    }

    pub fn data(&self) -> Option<&PrimaryData> {
        self.data.as_ref()
    }

    pub fn data_mut(&mut self) -> Option<&mut PrimaryData> {
        self.data.as_mut()
    }

    pub fn take_data(&mut self) -> Option<PrimaryData> {
        self.data.take()
    }

    pub fn errors(&self) -> Option<&ErrorsCollection> {
        self.errors.as_ref()
    }

    pub fn add_error(&mut self, error: ErrorObject) {
        self.errors.get_or_insert_with(ErrorsCollection::new).push(error);
    }

    pub fn has_errors(&self) -> bool {
        self.errors.as_ref().is_some_and(|e| !e.is_empty())
    }

    pub fn links(&self) -> Option<&LinksCollection> {
        self.links.as_ref()
    }

    pub fn add_link(&mut self, link: Link) -> Result<(), DocumentError> {
        self.links
            .get_or_insert_with(LinksCollection::new)
            .add(link)?;
        Ok(())
    }

    pub fn meta(&self) -> Option<&Meta> {
        self.meta.as_ref()
    }

    pub fn set_meta(&mut self, meta: Meta) {
        self.meta = Some(meta);
    }

    pub fn included(&self) -> Option<&ResourceCollection> {
        self.included.as_ref()
    }

    pub fn add_included(&mut self, resource: Resource) {
        self.included
            .get_or_insert_with(ResourceCollection::new)
            .push(resource);
    }

    pub fn version(&self) -> &'static str {
        JSONAPI_VERSION
    }

    /// Serialize to the wire shape.
    ///
    /// With errors present the output holds `errors`, `links`, `meta` and
    /// `jsonapi` only. Otherwise it holds `data` (possibly null), `included`
    /// when non-empty, `links`, `meta` and `jsonapi`.
    ///
    /// On the first call for data-bearing documents without a `self` link,
    /// one is synthesized from the base URL and added to this document's
    /// links.
    pub fn json_serialize(&mut self) -> Result<Value, DocumentError> {
        let mut out = Map::new();

        if self.has_errors() {
            out.insert("errors".into(), to_value(&self.errors)?);
        } else {
            self.synthesize_self_link()?;
            let data = match &self.data {
                None => Value::Null,
                Some(PrimaryData::Single(resource)) => to_value(resource)?,
                Some(PrimaryData::Many(resources)) => to_value(resources)?,
            };
            out.insert("data".into(), data);
            if let Some(included) = self.included.as_ref().filter(|c| !c.is_empty()) {
                out.insert("included".into(), to_value(included)?);
            }
        }

        if let Some(links) = self.links.as_ref().filter(|l| !l.is_empty()) {
            out.insert("links".into(), to_value(links)?);
        }
        if let Some(meta) = &self.meta {
            out.insert("meta".into(), meta.to_value());
        }

        let mut jsonapi = Map::new();
        jsonapi.insert("version".into(), Value::String(JSONAPI_VERSION.into()));
        out.insert("jsonapi".into(), Value::Object(jsonapi));

        Ok(Value::Object(out))
    }

    /// Serialize and render as a JSON string.
    pub fn to_json_string(&mut self, pretty: bool) -> Result<String, DocumentError> {
        let value = self.json_serialize()?;
        if pretty {
            serde_json::to_string_pretty(&value)
        } else {
            serde_json::to_string(&value)
        }
        .map_err(|source| DocumentError::Serialize { source })
    }

    fn synthesize_self_link(&mut self) -> Result<(), DocumentError> {
        if self.links.as_ref().is_some_and(|l| l.contains_name("self")) {
            return Ok(());
        }
        let path = match &self.data {
            Some(PrimaryData::Single(resource)) => resource.self_path(),
            Some(PrimaryData::Many(resources)) => resources
                .first()
                .map(|first| first.collection_path().to_string()),
            None => None,
        };
        if let Some(path) = path {
            let href = self.options.url_for(&path);
            self.add_link(Link::new("self", href))?;
        }
        Ok(())
    }
}

fn resources_from_values(
    items: &[Value],
    factory: &ResourceFactory,
) -> Result<ResourceCollection, DocumentError> {
    items
        .iter()
        .map(|item| factory.resource_from_value(item).map_err(DocumentError::from))
        .collect()
}

fn invalid_section(section: &'static str, expected: &'static str, actual: &Value) -> DocumentError {
    DocumentError::InvalidSection {
        section,
        expected,
        actual: json_type_name(actual).to_string(),
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, DocumentError> {
    serde_json::to_value(value).map_err(|source| DocumentError::Serialize { source })
}
