//! JSON:API resource model
//!
//! Typed resources, relationships and top-level documents for JSON:API 1.0,
//! with change tracking, lazy to-many hydration and deferred field validation.
//!
//! Resource types are described by a [`ResourceSchema`]: declared attributes
//! with defaults, declared relationships with a cardinality, and a setter per
//! field through which every incoming value is routed. Persistence goes through
//! a [`Datasource`]; [`InMemoryDatasource`] is the bundled implementation.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use jsonapi_resource::{Document, InMemoryDatasource, ResourceFactory, ResourceSchema};
//! use serde_json::json;
//!
//! let mut factory = ResourceFactory::new(Arc::new(InMemoryDatasource::new()));
//! factory.register(
//!     ResourceSchema::builder("widgets")
//!         .attribute("name", json!(null))
//!         .to_one("owner")
//!         .build()
//!         .unwrap(),
//! );
//!
//! let input = json!({
//!     "data": {
//!         "type": "widgets",
//!         "id": "7",
//!         "attributes": { "name": "Sprocket" },
//!         "relationships": { "owner": { "data": { "type": "people", "id": "1" } } }
//!     }
//! });
//!
//! let mut document = Document::from_value(&input, &factory).unwrap();
//! let output = document.json_serialize().unwrap();
//!
//! assert_eq!(output["data"]["attributes"]["name"], "Sprocket");
//! assert_eq!(output["links"]["self"], "/widgets/7");
//! assert_eq!(output["jsonapi"]["version"], "1.0");
//! ```
//!
//! # Change tracking
//!
//! | Operation | Recorded as a change |
//! |-----------|----------------------|
//! | Construction from persisted data | no |
//! | Schema defaults | no |
//! | Setting an attribute to a new value | yes |
//! | Setting a relationship to the same identifiers | no |
//! | Lazy to-many fetch | no |

mod collections;
mod datasource;
mod document;
mod error;
mod error_model;
mod factory;
mod link;
mod loader;
mod relationship;
mod resource;
mod schema;
mod types;
mod validator;

pub use collections::{CollectionKey, Meta, Named, NamedRegistry, Sequence};
pub use datasource::{Datasource, InMemoryDatasource, Query};
pub use document::{Document, PrimaryData};
pub use error::{DocumentError, FieldKind, ResourceError, ShapeError, ValidateError};
pub use error_model::{ErrorObject, ErrorSource, ErrorsCollection};
pub use factory::{Fetched, ResourceFactory};
pub use link::{Link, LinksCollection};
pub use loader::{
    is_url, load_document, load_document_auto, load_document_str, load_registry,
    load_registry_str, registry_from_value,
};
pub use relationship::{Relationship, RelationshipData, ResourceIdentifier};
pub use resource::{
    Changes, FieldChange, FieldError, Resource, ResourceCollection, QUEUED_ERROR_KEY,
    READ_ONLY_ERROR_KEY,
};
pub use schema::{
    AttributeDef, AttributeSetter, Cardinality, Privilege, RelationshipDef, RelationshipSetter,
    ResourceSchema, ResourceSchemaBuilder,
};
pub use types::{DocumentOptions, JSONAPI_VERSION};
pub use validator::{document_schema, validate_against_schema, validate_document_shape};

#[cfg(feature = "remote")]
pub use loader::load_document_url;
