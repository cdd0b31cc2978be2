//! Construction entry points tying schemas, a datasource and documents together.
//!
//! The factory owns the type registry: each resource type string maps to one
//! schema, and registering a second schema for the same type substitutes it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::collections::Meta;
use crate::datasource::{Datasource, Query};
use crate::document::Document;
use crate::error::ResourceError;
use crate::error_model::{ErrorObject, ErrorsCollection};
use crate::link::{Link, LinksCollection};
use crate::relationship::Relationship;
use crate::resource::{Resource, ResourceCollection};
use crate::schema::ResourceSchema;
use crate::types::DocumentOptions;

/// Result of [`ResourceFactory::get`].
#[derive(Debug)]
pub enum Fetched {
    One(Resource),
    Many(ResourceCollection),
}

pub struct ResourceFactory {
    datasource: Arc<dyn Datasource>,
    schemas: BTreeMap<String, Arc<ResourceSchema>>,
    options: DocumentOptions,
}

impl ResourceFactory {
    pub fn new(datasource: Arc<dyn Datasource>) -> Self {
        Self {
            datasource,
            schemas: BTreeMap::new(),
            options: DocumentOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DocumentOptions) -> Self {
        self.options = options;
        self
    }

    /// Register (or substitute) the schema for its resource type.
    pub fn register(&mut self, schema: Arc<ResourceSchema>) -> &mut Self {
        self.schemas
            .insert(schema.resource_type().to_string(), schema);
        self
    }

    pub fn schema(&self, resource_type: &str) -> Result<Arc<ResourceSchema>, ResourceError> {
        self.schemas
            .get(resource_type)
            .cloned()
            .ok_or_else(|| ResourceError::UnknownResourceType {
                resource_type: resource_type.to_string(),
            })
    }

    pub fn registered_types(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    pub fn datasource(&self) -> &Arc<dyn Datasource> {
        &self.datasource
    }

    pub fn options(&self) -> &DocumentOptions {
        &self.options
    }

    /// Construct a resource of a registered type against this factory's
    /// datasource.
    pub fn new_resource(
        &self,
        resource_type: &str,
        data: Option<&Value>,
    ) -> Result<Resource, ResourceError> {
        let schema = self.schema(resource_type)?;
        Resource::new(schema, Some(Arc::clone(&self.datasource)), data)
    }

    /// Construct a resource from a resource object, choosing the schema by
    /// its `type` member.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::MissingType` if the object has no string type.
    pub fn resource_from_value(&self, value: &Value) -> Result<Resource, ResourceError> {
        let resource_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ResourceError::MissingType)?;
        self.new_resource(resource_type, Some(value))
    }

    /// Construct a resource from `data` and persist it.
    pub fn create(&self, resource_type: &str, data: Option<&Value>) -> Result<Resource, ResourceError> {
        let mut resource = self.new_resource(resource_type, data)?;
        resource.save()?;
        Ok(resource)
    }

    /// Fetch persisted resources. A query with an id yields one resource or
    /// `ResourceNotFound`; any other query yields a (possibly empty) collection.
    pub fn get(&self, resource_type: &str, query: &Query) -> Result<Fetched, ResourceError> {
        let schema = self.schema(resource_type)?;
        let records = self.datasource.query(resource_type, query)?;
        debug!(resource_type, found = records.len(), "Query");

        if let Some(id) = &query.id {
            let record = records
                .into_iter()
                .next()
                .ok_or_else(|| ResourceError::ResourceNotFound {
                    resource_type: resource_type.to_string(),
                    id: id.clone(),
                })?;
            return self.hydrate_one(&schema, record).map(Fetched::One);
        }

        records
            .into_iter()
            .map(|record| self.hydrate_one(&schema, record))
            .collect::<Result<ResourceCollection, _>>()
            .map(Fetched::Many)
    }

    fn hydrate_one(
        &self,
        schema: &Arc<ResourceSchema>,
        record: Value,
    ) -> Result<Resource, ResourceError> {
        self.datasource.stage_current_data(record);
        Resource::new(Arc::clone(schema), Some(Arc::clone(&self.datasource)), None)
    }

    /// Delete by id. Deleting an absent resource succeeds.
    pub fn delete(&self, resource_type: &str, id: &str) -> Result<(), ResourceError> {
        self.datasource.delete(resource_type, id)
    }

    /// Re-type `source` as `target`, keeping only fields `target` declares.
    pub fn convert(
        &self,
        source: &Resource,
        target: Arc<ResourceSchema>,
    ) -> Result<Resource, ResourceError> {
        Resource::from_resource(target, source, Some(Arc::clone(&self.datasource)))
    }

    pub fn new_document(&self) -> Document {
        Document::new(self.options.clone())
    }

    pub fn new_relationship(&self, name: &str) -> Relationship {
        Relationship::new(name)
    }

    pub fn new_error(&self, status: u16, title: &str) -> Result<ErrorObject, ResourceError> {
        ErrorObject::new(status, title)
    }

    pub fn new_errors(&self) -> ErrorsCollection {
        ErrorsCollection::new()
    }

    pub fn new_link(&self, name: &str, href: &str) -> Link {
        Link::new(name, href)
    }

    pub fn new_links(&self) -> LinksCollection {
        LinksCollection::new()
    }

    pub fn new_meta(&self) -> Meta {
        Meta::new()
    }

    pub fn new_resource_collection(&self) -> ResourceCollection {
        ResourceCollection::new()
    }
}
