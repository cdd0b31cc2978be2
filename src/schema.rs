//! Per-type resource schemas: declared fields, defaults and setter tables.
//!
//! A schema is built once per resource type and shared by every instance via
//! `Arc`. Each declared field maps to a setter function; all incoming values
//! are routed through that table, so an unknown name is simply a table miss.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{FieldKind, ResourceError};
use crate::relationship::Relationship;
use crate::resource::Resource;

/// Setter invoked for an attribute value. Implementations validate, record
/// field errors on the resource, and store through `Resource::set_attribute`.
pub type AttributeSetter =
    Arc<dyn Fn(&mut Resource, Value) -> Result<(), ResourceError> + Send + Sync>;

/// Setter invoked for a relationship. Implementations store through
/// `Resource::set_relationship`.
pub type RelationshipSetter =
    Arc<dyn Fn(&mut Resource, Relationship) -> Result<(), ResourceError> + Send + Sync>;

/// Capability passed to an update that may write read-only attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Privilege {
    #[default]
    Standard,
    /// Bypasses the read-only check for the duration of one call.
    Privileged,
}

/// Whether a relationship points at one resource or many.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    ToOne,
    ToMany,
}

impl Cardinality {
    pub fn describe(&self) -> &'static str {
        match self {
            Cardinality::ToOne => "to-one",
            Cardinality::ToMany => "to-many",
        }
    }
}

/// A declared attribute.
#[derive(Clone)]
pub struct AttributeDef {
    pub name: String,
    pub default: Value,
    /// Immutable once the resource is initialized, unless privileged.
    pub read_only: bool,
    pub setter: AttributeSetter,
}

impl fmt::Debug for AttributeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeDef")
            .field("name", &self.name)
            .field("default", &self.default)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

/// A declared relationship.
#[derive(Clone)]
pub struct RelationshipDef {
    pub name: String,
    pub cardinality: Cardinality,
    pub setter: RelationshipSetter,
}

impl fmt::Debug for RelationshipDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationshipDef")
            .field("name", &self.name)
            .field("cardinality", &self.cardinality)
            .finish_non_exhaustive()
    }
}

/// Immutable description of one resource type.
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    resource_type: String,
    collection_path: String,
    attributes: Vec<AttributeDef>,
    relationships: Vec<RelationshipDef>,
}

impl ResourceSchema {
    pub fn builder(resource_type: impl Into<String>) -> ResourceSchemaBuilder {
        let resource_type = resource_type.into();
        ResourceSchemaBuilder {
            collection_path: format!("/{resource_type}"),
            resource_type,
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Path of the collection endpoint, e.g. "/widgets".
    pub fn collection_path(&self) -> &str {
        &self.collection_path
    }

    /// Path of one member, e.g. "/widgets/7".
    pub fn self_path(&self, id: &str) -> String {
        format!("{}/{}", self.collection_path, id)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipDef> {
        self.relationships.iter().find(|r| r.name == name)
    }

    pub fn attributes(&self) -> &[AttributeDef] {
        &self.attributes
    }

    pub fn relationships(&self) -> &[RelationshipDef] {
        &self.relationships
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    pub fn has_relationship(&self, name: &str) -> bool {
        self.relationship(name).is_some()
    }
}

/// Builder for [`ResourceSchema`]. Declaring a name twice replaces the earlier
/// declaration of the same kind.
pub struct ResourceSchemaBuilder {
    resource_type: String,
    collection_path: String,
    attributes: Vec<AttributeDef>,
    relationships: Vec<RelationshipDef>,
}

impl ResourceSchemaBuilder {
    /// Declare an attribute stored as-is.
    pub fn attribute(self, name: impl Into<String>, default: Value) -> Self {
        let name = name.into();
        let setter = plain_attribute_setter(name.clone());
        self.push_attribute(name, default, false, setter)
    }

    /// Declare an attribute that cannot change after initialization.
    pub fn read_only_attribute(self, name: impl Into<String>, default: Value) -> Self {
        let name = name.into();
        let setter = plain_attribute_setter(name.clone());
        self.push_attribute(name, default, true, setter)
    }

    /// Declare an attribute with a custom setter.
    pub fn attribute_with<F>(self, name: impl Into<String>, default: Value, setter: F) -> Self
    where
        F: Fn(&mut Resource, Value) -> Result<(), ResourceError> + Send + Sync + 'static,
    {
        self.push_attribute(name.into(), default, false, Arc::new(setter))
    }

    /// Declare a read-only attribute with a custom setter. The setter only
    /// sees writes that pass the read-only check.
    pub fn read_only_attribute_with<F>(
        self,
        name: impl Into<String>,
        default: Value,
        setter: F,
    ) -> Self
    where
        F: Fn(&mut Resource, Value) -> Result<(), ResourceError> + Send + Sync + 'static,
    {
        self.push_attribute(name.into(), default, true, Arc::new(setter))
    }

    pub fn to_one(self, name: impl Into<String>) -> Self {
        self.relationship(name, Cardinality::ToOne)
    }

    pub fn to_many(self, name: impl Into<String>) -> Self {
        self.relationship(name, Cardinality::ToMany)
    }

    pub fn relationship(self, name: impl Into<String>, cardinality: Cardinality) -> Self {
        let setter: RelationshipSetter = Arc::new(|resource: &mut Resource, rel: Relationship| {
            resource.set_relationship(rel)
        });
        self.push_relationship(name.into(), cardinality, setter)
    }

    /// Declare a relationship with a custom setter.
    pub fn relationship_with<F>(
        self,
        name: impl Into<String>,
        cardinality: Cardinality,
        setter: F,
    ) -> Self
    where
        F: Fn(&mut Resource, Relationship) -> Result<(), ResourceError> + Send + Sync + 'static,
    {
        self.push_relationship(name.into(), cardinality, Arc::new(setter))
    }

    pub fn collection_path(mut self, path: impl Into<String>) -> Self {
        self.collection_path = path.into();
        self
    }

    /// Finish the schema.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::DuplicateMember` if a name is declared both as
    /// an attribute and as a relationship.
    pub fn build(self) -> Result<Arc<ResourceSchema>, ResourceError> {
        if let Some(clash) = self
            .attributes
            .iter()
            .find(|a| self.relationships.iter().any(|r| r.name == a.name))
        {
            return Err(ResourceError::DuplicateMember {
                name: clash.name.clone(),
            });
        }

        Ok(Arc::new(ResourceSchema {
            resource_type: self.resource_type,
            collection_path: self.collection_path,
            attributes: self.attributes,
            relationships: self.relationships,
        }))
    }

    fn push_attribute(
        mut self,
        name: String,
        default: Value,
        read_only: bool,
        setter: AttributeSetter,
    ) -> Self {
        self.attributes.retain(|a| a.name != name);
        self.attributes.push(AttributeDef {
            name,
            default,
            read_only,
            setter,
        });
        self
    }

    fn push_relationship(
        mut self,
        name: String,
        cardinality: Cardinality,
        setter: RelationshipSetter,
    ) -> Self {
        self.relationships.retain(|r| r.name != name);
        self.relationships.push(RelationshipDef {
            name,
            cardinality,
            setter,
        });
        self
    }
}

fn plain_attribute_setter(name: String) -> AttributeSetter {
    Arc::new(move |resource: &mut Resource, value: Value| {
        resource.set_attribute(&name, value)
    })
}

/// Lookup failure helper shared by the resource dispatchers.
pub(crate) fn unknown_field(resource: String, kind: FieldKind, name: &str) -> ResourceError {
    ResourceError::UnknownField {
        resource,
        kind,
        names: vec![name.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_keeps_declaration_order() {
        let schema = ResourceSchema::builder("widgets")
            .attribute("name", json!(null))
            .attribute("size", json!(1))
            .to_one("owner")
            .to_many("parts")
            .build()
            .unwrap();

        let names: Vec<&str> = schema.attributes().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["name", "size"]);
        assert_eq!(
            schema.relationship("parts").unwrap().cardinality,
            Cardinality::ToMany
        );
        assert_eq!(schema.collection_path(), "/widgets");
        assert_eq!(schema.self_path("3"), "/widgets/3");
    }

    #[test]
    fn redeclaring_replaces() {
        let schema = ResourceSchema::builder("widgets")
            .attribute("name", json!(null))
            .read_only_attribute("name", json!("x"))
            .build()
            .unwrap();
        assert_eq!(schema.attributes().len(), 1);
        assert!(schema.attribute("name").unwrap().read_only);
    }

    #[test]
    fn attribute_relationship_clash_is_rejected() {
        let err = ResourceSchema::builder("widgets")
            .attribute("owner", json!(null))
            .to_one("owner")
            .build()
            .unwrap_err();
        assert!(matches!(err, ResourceError::DuplicateMember { name } if name == "owner"));
    }
}
