//! The resource entity: attribute/relationship state with change tracking.
//!
//! # Lifecycle
//!
//! Construction runs in a fixed order:
//!
//! 1. every declared attribute starts as `null`;
//! 2. declared defaults are applied through each attribute's setter;
//! 3. a null-data [`Relationship`] is materialized for every declared relationship;
//! 4. any payload pending on the datasource is applied with change tracking
//!    off, and the resource becomes `initialized`;
//! 5. caller-supplied data is applied as a tracked overlay.
//!
//! # Change tracking
//!
//! Only [`Resource::set_attribute`] and [`Resource::set_relationship`] mutate
//! state. While tracking is on they record the latest value of every field that
//! actually changed; relationships compare identifiers, not object identity.
//! Tracking is switched off only through a scoped guard, so it is restored on
//! every exit path.
//!
//! # Field errors
//!
//! Validation problems are recoverable. Setters record them with
//! [`Resource::add_error`] and carry on; callers inspect
//! [`Resource::has_errors`] afterwards. Contract violations (unknown names,
//! conflicting identity, malformed payloads) are returned as `Err`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use crate::collections::Sequence;
use crate::datasource::Datasource;
use crate::error::{FieldKind, ResourceError};
use crate::error_model::{ErrorObject, ErrorsCollection};
use crate::relationship::{Relationship, RelationshipData, ResourceIdentifier};
use crate::schema::{unknown_field, Cardinality, Privilege, ResourceSchema};
use crate::types::{json_type_name, RESOURCE_KEYS};

/// Named-error key attached to a field while its validation is deferred.
pub const QUEUED_ERROR_KEY: &str = "queued";

/// Named-error key attached when a read-only attribute write is refused.
pub const READ_ONLY_ERROR_KEY: &str = "read_only";

/// Ordered list of full resources.
pub type ResourceCollection = Sequence<Resource>;

/// One field-level problem, optionally keyed so it can be cleared later.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    pub key: Option<String>,
    pub error: ErrorObject,
}

/// Everything changed since the last tracking reset.
#[derive(Debug, Clone, Copy)]
pub struct Changes<'a> {
    pub attributes: &'a Map<String, Value>,
    pub relationships: &'a BTreeMap<String, Relationship>,
}

/// The recorded change for a single field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldChange<'a> {
    Attribute(&'a Value),
    Relationship(&'a Relationship),
}

/// Validated form of an incoming `{type, id, attributes, relationships}` map.
struct Overlay {
    resource_type: Option<String>,
    id: Option<String>,
    attributes: Vec<(String, Value)>,
    relationships: Vec<Relationship>,
}

/// A typed resource with change-tracked attributes and relationships.
#[derive(Clone)]
pub struct Resource {
    schema: Arc<ResourceSchema>,
    datasource: Option<Arc<dyn Datasource>>,
    resource_type: Option<String>,
    id: Option<String>,
    attributes: Map<String, Value>,
    relationships: Vec<Relationship>,
    changed_attributes: Map<String, Value>,
    changed_relationships: BTreeMap<String, Relationship>,
    track_changes: bool,
    initialized: bool,
    initialized_relationships: BTreeSet<String>,
    errors: BTreeMap<String, Vec<FieldError>>,
    validation_queue: BTreeMap<String, Vec<String>>,
}

/// Scoped suspension of change tracking; restores the previous flag on drop.
struct Untracked<'a> {
    resource: &'a mut Resource,
    previous: bool,
}

impl Deref for Untracked<'_> {
    type Target = Resource;

    fn deref(&self) -> &Resource {
        self.resource
    }
}

impl DerefMut for Untracked<'_> {
    fn deref_mut(&mut self) -> &mut Resource {
        self.resource
    }
}

impl Drop for Untracked<'_> {
    fn drop(&mut self) {
        self.resource.track_changes = self.previous;
    }
}

impl Resource {
    /// Construct a resource of `schema`'s type.
    ///
    /// Pending persisted data is taken from `datasource` (if any) and applied
    /// untracked; `data` is then applied as tracked caller input.
    ///
    /// # Errors
    ///
    /// Fails on any contract violation in the defaults, the persisted payload
    /// or `data`.
    pub fn new(
        schema: Arc<ResourceSchema>,
        datasource: Option<Arc<dyn Datasource>>,
        data: Option<&Value>,
    ) -> Result<Self, ResourceError> {
        let mut resource = Self::hydrated_skeleton(schema, datasource)?;
        if let Some(data) = data {
            resource.update_from_data(data)?;
        }
        Ok(resource)
    }

    /// Re-type `source` as a resource of `schema`.
    ///
    /// Only fields that `schema` also declares are copied; everything else is
    /// dropped. The result starts with fresh initialization and tracking
    /// state, as if constructed from the filtered data.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::IncompatibleConversion` when the two declared
    /// resource types differ.
    pub fn from_resource(
        schema: Arc<ResourceSchema>,
        source: &Resource,
        datasource: Option<Arc<dyn Datasource>>,
    ) -> Result<Self, ResourceError> {
        let from = source.resource_type().unwrap_or_default();
        if from != schema.resource_type() {
            return Err(ResourceError::IncompatibleConversion {
                from: from.to_string(),
                to: schema.resource_type().to_string(),
            });
        }

        let overlay = Overlay {
            resource_type: source.resource_type.clone(),
            id: source.id.clone(),
            attributes: source
                .attributes
                .iter()
                .filter(|(name, _)| schema.has_attribute(name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            relationships: source
                .relationships
                .iter()
                .filter(|rel| schema.has_relationship(rel.name()) && !rel.is_bare())
                .cloned()
                .collect(),
        };

        let mut resource = Self::hydrated_skeleton(schema, datasource)?;
        resource.apply_overlay(overlay, Privilege::Standard)?;
        Ok(resource)
    }

    /// Steps 1-4 of construction.
    fn hydrated_skeleton(
        schema: Arc<ResourceSchema>,
        datasource: Option<Arc<dyn Datasource>>,
    ) -> Result<Self, ResourceError> {
        let attributes = schema
            .attributes()
            .iter()
            .map(|def| (def.name.clone(), Value::Null))
            .collect();
        let relationships = schema
            .relationships()
            .iter()
            .map(|def| Relationship::new(def.name.clone()))
            .collect();
        let resource_type = Some(schema.resource_type().to_string()).filter(|t| !t.is_empty());

        let mut resource = Self {
            schema,
            datasource,
            resource_type,
            id: None,
            attributes,
            relationships,
            changed_attributes: Map::new(),
            changed_relationships: BTreeMap::new(),
            track_changes: true,
            initialized: false,
            initialized_relationships: BTreeSet::new(),
            errors: BTreeMap::new(),
            validation_queue: BTreeMap::new(),
        };

        // Claim the staged payload before anything can fail, so it never
        // leaks into the next construction.
        let pending = resource
            .datasource
            .as_ref()
            .and_then(|ds| ds.take_current_data());

        resource.apply_defaults()?;

        if let Some(persisted) = pending {
            debug!(resource = %resource.identity(), "Hydrating from pending datasource payload");
            resource.hydrate(&persisted)?;
        }

        Ok(resource)
    }

    /// Defaults describe the schema, not a caller edit, so they are applied
    /// untracked.
    fn apply_defaults(&mut self) -> Result<(), ResourceError> {
        let defaults: Vec<(String, Value)> = self
            .schema
            .attributes()
            .iter()
            .map(|def| (def.name.clone(), def.default.clone()))
            .collect();

        let mut untracked = self.untracked();
        for (name, default) in defaults {
            untracked.dispatch_attribute(&name, default, Privilege::Privileged)?;
        }
        Ok(())
    }

    fn untracked(&mut self) -> Untracked<'_> {
        let previous = self.track_changes;
        self.track_changes = false;
        Untracked {
            resource: self,
            previous,
        }
    }

    /// Apply persisted data without tracking and mark the resource initialized.
    fn hydrate(&mut self, data: &Value) -> Result<(), ResourceError> {
        let overlay = self.parse_overlay(data)?;
        {
            let mut untracked = self.untracked();
            untracked.apply_overlay(overlay, Privilege::Privileged)?;
        }
        self.initialized = true;
        Ok(())
    }

    // --- Identity ---

    pub fn schema(&self) -> &Arc<ResourceSchema> {
        &self.schema
    }

    pub fn resource_type(&self) -> Option<&str> {
        self.resource_type.as_deref()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// `(type, id)` once both are known.
    pub fn identifier(&self) -> Option<ResourceIdentifier> {
        match (&self.resource_type, &self.id) {
            (Some(t), Some(id)) => Some(ResourceIdentifier::new(t.as_str(), id.as_str())),
            _ => None,
        }
    }

    /// Human-readable identity used in error messages, e.g. "widgets/7".
    pub fn identity(&self) -> String {
        format!(
            "{}/{}",
            self.resource_type.as_deref().unwrap_or("(untyped)"),
            self.id.as_deref().unwrap_or("(new)")
        )
    }

    /// Set the id. Null to value is allowed, value to the same value is a
    /// no-op, value to a different value fails.
    pub fn set_id(&mut self, id: impl Into<String>) -> Result<(), ResourceError> {
        let id = id.into();
        match &self.id {
            None => {
                self.id = Some(id);
                Ok(())
            }
            Some(current) if *current == id => Ok(()),
            Some(current) => Err(ResourceError::DuplicateIdentity {
                field: "id",
                current: current.clone(),
                attempted: id,
            }),
        }
    }

    /// Set the type under the same write-once rule as the id.
    pub fn set_type(&mut self, resource_type: impl Into<String>) -> Result<(), ResourceError> {
        let resource_type = resource_type.into();
        match &self.resource_type {
            None => {
                self.resource_type = Some(resource_type);
                Ok(())
            }
            Some(current) if *current == resource_type => Ok(()),
            Some(current) => Err(ResourceError::DuplicateIdentity {
                field: "type",
                current: current.clone(),
                attempted: resource_type,
            }),
        }
    }

    pub fn self_path(&self) -> Option<String> {
        self.id.as_deref().map(|id| self.schema.self_path(id))
    }

    pub fn collection_path(&self) -> &str {
        self.schema.collection_path()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn datasource(&self) -> Option<&Arc<dyn Datasource>> {
        self.datasource.as_ref()
    }

    // --- Overlay application ---

    /// Apply a caller-supplied `{id?, type?, attributes?, relationships?}` map.
    ///
    /// Key names, payload shapes, identity conflicts and relationship
    /// cardinality are checked before anything is written. Every
    /// unrecognized top-level key, unknown attribute and unknown relationship
    /// is reported at once. Setters run afterwards, one field at a time; if a
    /// setter fails, the fields applied before it stay written.
    pub fn update_from_data(&mut self, data: &Value) -> Result<(), ResourceError> {
        let overlay = self.parse_overlay(data)?;
        self.apply_overlay(overlay, Privilege::Standard)
    }

    /// Like [`Resource::update_from_data`], but read-only attributes may be
    /// written for the duration of this call.
    pub fn update_from_data_privileged(&mut self, data: &Value) -> Result<(), ResourceError> {
        let overlay = self.parse_overlay(data)?;
        self.apply_overlay(overlay, Privilege::Privileged)
    }

    fn parse_overlay(&self, data: &Value) -> Result<Overlay, ResourceError> {
        let Value::Object(map) = data else {
            return Err(ResourceError::InvalidKey {
                key: self.identity(),
                message: format!("resource data must be an object, got {}", json_type_name(data)),
            });
        };

        let leftover: Vec<String> = map
            .keys()
            .filter(|k| !RESOURCE_KEYS.contains(&k.as_str()))
            .cloned()
            .collect();
        if !leftover.is_empty() {
            return Err(ResourceError::MalformedInput {
                resource: self.identity(),
                keys: leftover,
            });
        }

        let resource_type = match map.get("type") {
            None | Some(Value::Null) => None,
            Some(Value::String(t)) => Some(t.clone()),
            Some(other) => {
                return Err(ResourceError::InvalidKey {
                    key: "type".into(),
                    message: format!("expected string, got {}", json_type_name(other)),
                })
            }
        };

        let id = match map.get("id") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(id.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(other) => {
                return Err(ResourceError::InvalidKey {
                    key: "id".into(),
                    message: format!("expected string, got {}", json_type_name(other)),
                })
            }
        };

        let attributes = match map.get("attributes") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Object(attrs)) => {
                let unknown: Vec<String> = attrs
                    .keys()
                    .filter(|k| !self.schema.has_attribute(k))
                    .cloned()
                    .collect();
                if !unknown.is_empty() {
                    return Err(ResourceError::UnknownField {
                        resource: self.identity(),
                        kind: FieldKind::Attribute,
                        names: unknown,
                    });
                }
                attrs.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            }
            Some(other) => {
                return Err(ResourceError::InvalidKey {
                    key: "attributes".into(),
                    message: format!("expected object, got {}", json_type_name(other)),
                })
            }
        };

        let relationships = match map.get("relationships") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Object(rels)) => {
                let unknown: Vec<String> = rels
                    .keys()
                    .filter(|k| !self.schema.has_relationship(k))
                    .cloned()
                    .collect();
                if !unknown.is_empty() {
                    return Err(ResourceError::UnknownField {
                        resource: self.identity(),
                        kind: FieldKind::Relationship,
                        names: unknown,
                    });
                }
                rels.iter()
                    .map(|(name, raw)| Relationship::from_value(name, raw))
                    .collect::<Result<Vec<_>, _>>()?
            }
            Some(other) => {
                return Err(ResourceError::InvalidKey {
                    key: "relationships".into(),
                    message: format!("expected object, got {}", json_type_name(other)),
                })
            }
        };

        for (field, current, incoming) in [
            ("type", &self.resource_type, &resource_type),
            ("id", &self.id, &id),
        ] {
            if let (Some(current), Some(attempted)) = (current, incoming) {
                if current != attempted {
                    return Err(ResourceError::DuplicateIdentity {
                        field,
                        current: current.clone(),
                        attempted: attempted.clone(),
                    });
                }
            }
        }

        for relationship in &relationships {
            let Some(def) = self.schema.relationship(relationship.name()) else {
                continue;
            };
            let mismatch = match def.cardinality {
                Cardinality::ToOne => relationship.data().is_many(),
                Cardinality::ToMany => matches!(relationship.data(), RelationshipData::One(_)),
            };
            if mismatch {
                return Err(ResourceError::CardinalityMismatch {
                    name: relationship.name().to_string(),
                    expected: def.cardinality.describe(),
                });
            }
        }

        Ok(Overlay {
            resource_type,
            id,
            attributes,
            relationships,
        })
    }

    fn apply_overlay(&mut self, overlay: Overlay, privilege: Privilege) -> Result<(), ResourceError> {
        if let Some(resource_type) = overlay.resource_type {
            self.set_type(resource_type)?;
        }
        if let Some(id) = overlay.id {
            self.set_id(id)?;
        }
        for (name, value) in overlay.attributes {
            self.dispatch_attribute(&name, value, privilege)?;
        }
        for relationship in overlay.relationships {
            self.dispatch_relationship(relationship)?;
        }
        Ok(())
    }

    // --- Setter dispatch ---

    /// Route `value` through the declared setter for `name`.
    ///
    /// Read-only attributes of an initialized resource refuse standard writes
    /// that would change them: the refusal is recorded as a field error and
    /// the call still succeeds.
    pub fn apply_attribute(&mut self, name: &str, value: Value) -> Result<(), ResourceError> {
        self.dispatch_attribute(name, value, Privilege::Standard)
    }

    fn dispatch_attribute(
        &mut self,
        name: &str,
        value: Value,
        privilege: Privilege,
    ) -> Result<(), ResourceError> {
        let Some(def) = self.schema.attribute(name) else {
            return Err(unknown_field(self.identity(), FieldKind::Attribute, name));
        };
        let setter = Arc::clone(&def.setter);

        if def.read_only
            && self.initialized
            && privilege == Privilege::Standard
            && self.attributes.get(name) != Some(&value)
        {
            warn!(resource = %self.identity(), attribute = name, "Refused write to read-only attribute");
            let error = ErrorObject::new(400, "Read-only attribute")?
                .with_detail(format!("'{name}' cannot be changed"))
                .with_code(READ_ONLY_ERROR_KEY)
                .with_pointer(format!("/data/attributes/{name}"));
            self.add_named_error(name, READ_ONLY_ERROR_KEY, error);
            return Ok(());
        }

        setter(self, value)
    }

    /// Route `relationship` through the declared setter for its name.
    pub fn apply_relationship(&mut self, relationship: Relationship) -> Result<(), ResourceError> {
        self.dispatch_relationship(relationship)
    }

    fn dispatch_relationship(&mut self, relationship: Relationship) -> Result<(), ResourceError> {
        let Some(def) = self.schema.relationship(relationship.name()) else {
            return Err(unknown_field(
                self.identity(),
                FieldKind::Relationship,
                relationship.name(),
            ));
        };
        let setter = Arc::clone(&def.setter);

        self.ensure_relationship_hydrated(relationship.name())?;
        setter(self, relationship)
    }

    // --- Tracked mutation (the only paths setters may use) ---

    /// Store an attribute value, recording it as changed if it differs.
    pub fn set_attribute(&mut self, name: &str, value: Value) -> Result<(), ResourceError> {
        if !self.schema.has_attribute(name) {
            return Err(unknown_field(self.identity(), FieldKind::Attribute, name));
        }
        if self.attributes.get(name) == Some(&value) {
            return Ok(());
        }

        if self.track_changes {
            trace!(resource = %self.identity(), attribute = name, "Attribute changed");
            self.changed_attributes.insert(name.to_string(), value.clone());
        }
        self.attributes.insert(name.to_string(), value);
        Ok(())
    }

    /// Store a relationship, recording it as changed if it names different
    /// resources than before.
    pub fn set_relationship(&mut self, relationship: Relationship) -> Result<(), ResourceError> {
        let name = relationship.name().to_string();
        let Some(def) = self.schema.relationship(&name) else {
            return Err(unknown_field(self.identity(), FieldKind::Relationship, &name));
        };
        let cardinality = def.cardinality;

        match (cardinality, relationship.data()) {
            (Cardinality::ToOne, RelationshipData::Many(_))
            | (Cardinality::ToMany, RelationshipData::One(_)) => {
                return Err(ResourceError::CardinalityMismatch {
                    name,
                    expected: cardinality.describe(),
                })
            }
            _ => {}
        }

        let Some(slot) = self.relationships.iter().position(|r| r.name() == name) else {
            return Err(unknown_field(self.identity(), FieldKind::Relationship, &name));
        };

        let changed = self.relationships[slot]
            .data()
            .differs_from(relationship.data());
        if changed && self.track_changes {
            trace!(resource = %self.identity(), relationship = %name, "Relationship changed");
            self.changed_relationships
                .insert(name.clone(), relationship.clone());
        }
        if cardinality == Cardinality::ToMany {
            self.initialized_relationships.insert(name);
        }
        self.relationships[slot] = relationship;
        Ok(())
    }

    // --- Reads ---

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// Read a relationship, hydrating a to-many relationship on first access.
    pub fn relationship(&mut self, name: &str) -> Result<&Relationship, ResourceError> {
        if !self.schema.has_relationship(name) {
            return Err(unknown_field(self.identity(), FieldKind::Relationship, name));
        }
        self.ensure_relationship_hydrated(name)?;
        self.peek_relationship(name)
            .ok_or_else(|| unknown_field(self.identity(), FieldKind::Relationship, name))
    }

    /// Read a relationship as currently held, without hydrating it.
    pub fn peek_relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name() == name)
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn is_relationship_hydrated(&self, name: &str) -> bool {
        self.initialized_relationships.contains(name)
    }

    // --- Lazy to-many hydration ---

    fn ensure_relationship_hydrated(&mut self, name: &str) -> Result<(), ResourceError> {
        // Untracked contexts are themselves hydration; they supply the data.
        if !self.track_changes || self.initialized_relationships.contains(name) {
            return Ok(());
        }
        let is_to_many = self
            .schema
            .relationship(name)
            .map(|def| def.cardinality == Cardinality::ToMany)
            .unwrap_or(false);
        if !is_to_many {
            return Ok(());
        }
        let (Some(datasource), Some(owner)) = (self.datasource.clone(), self.identifier()) else {
            return Ok(());
        };

        debug!(resource = %self.identity(), relationship = name, "Hydrating to-many relationship");
        let related = datasource.get_related(&owner, name)?;
        self.initialized_relationships.insert(name.to_string());

        let current = self
            .peek_relationship(name)
            .cloned()
            .unwrap_or_else(|| Relationship::new(name));
        let hydrated = current.with_data(RelationshipData::Many(related));

        let mut untracked = self.untracked();
        let result = untracked.dispatch_relationship(hydrated);
        drop(untracked);
        if result.is_err() {
            self.initialized_relationships.remove(name);
        }
        result
    }

    /// Whether `target` is a member of the to-many relationship `name`,
    /// compared by (id, type).
    pub fn has_related(
        &mut self,
        name: &str,
        target: &ResourceIdentifier,
    ) -> Result<bool, ResourceError> {
        Ok(self.relationship(name)?.contains(target))
    }

    pub fn index_of_related(
        &mut self,
        name: &str,
        target: &ResourceIdentifier,
    ) -> Result<Option<usize>, ResourceError> {
        Ok(self.relationship(name)?.index_of(target))
    }

    /// Add `target` to the to-many relationship `name` through its setter.
    pub fn add_related(
        &mut self,
        name: &str,
        target: ResourceIdentifier,
    ) -> Result<(), ResourceError> {
        let mut updated = self.relationship(name)?.clone();
        updated.push(target);
        self.dispatch_relationship(updated)
    }

    /// Remove `target` from the to-many relationship `name`. Removing a
    /// non-member is a no-op.
    pub fn remove_related(
        &mut self,
        name: &str,
        target: &ResourceIdentifier,
    ) -> Result<(), ResourceError> {
        let mut updated = self.relationship(name)?.clone();
        if !updated.remove(target) {
            return Ok(());
        }
        self.dispatch_relationship(updated)
    }

    // --- Change tracking ---

    /// Whether anything changed since the last reset, optionally for one field.
    pub fn has_changes(&self, field: Option<&str>) -> bool {
        match field {
            Some(name) => {
                self.changed_attributes.contains_key(name)
                    || self.changed_relationships.contains_key(name)
            }
            None => !self.changed_attributes.is_empty() || !self.changed_relationships.is_empty(),
        }
    }

    pub fn changes(&self) -> Changes<'_> {
        Changes {
            attributes: &self.changed_attributes,
            relationships: &self.changed_relationships,
        }
    }

    /// The latest recorded change for one field.
    pub fn change(&self, field: &str) -> Option<FieldChange<'_>> {
        if let Some(value) = self.changed_attributes.get(field) {
            return Some(FieldChange::Attribute(value));
        }
        self.changed_relationships
            .get(field)
            .map(FieldChange::Relationship)
    }

    /// Forget all recorded changes (post-save checkpoint).
    pub fn reset_changes(&mut self) {
        self.changed_attributes.clear();
        self.changed_relationships.clear();
    }

    // --- Field errors ---

    pub fn add_error(&mut self, field: &str, error: ErrorObject) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(FieldError { key: None, error });
    }

    /// Attach an error under `key`, replacing any error already under it.
    pub fn add_named_error(&mut self, field: &str, key: &str, error: ErrorObject) {
        let entries = self.errors.entry(field.to_string()).or_default();
        entries.retain(|e| e.key.as_deref() != Some(key));
        entries.push(FieldError {
            key: Some(key.to_string()),
            error,
        });
    }

    /// Remove the error stored under `key`. Returns whether one existed.
    pub fn remove_named_error(&mut self, field: &str, key: &str) -> bool {
        let Some(entries) = self.errors.get_mut(field) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| e.key.as_deref() != Some(key));
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.errors.remove(field);
        }
        removed
    }

    pub fn has_errors(&self, field: Option<&str>) -> bool {
        match field {
            Some(name) => self.errors.get(name).is_some_and(|e| !e.is_empty()),
            None => self.errors.values().any(|e| !e.is_empty()),
        }
    }

    /// Errors for one field, or for all fields in field-name order.
    pub fn errors(&self, field: Option<&str>) -> ErrorsCollection {
        match field {
            Some(name) => self
                .errors
                .get(name)
                .map(|entries| entries.iter().map(|e| e.error.clone()).collect())
                .unwrap_or_default(),
            None => self
                .errors
                .values()
                .flatten()
                .map(|e| e.error.clone())
                .collect(),
        }
    }

    pub fn field_errors(&self, field: &str) -> &[FieldError] {
        self.errors.get(field).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn clear_errors(&mut self, field: Option<&str>) {
        match field {
            Some(name) => {
                self.errors.remove(name);
            }
            None => self.errors.clear(),
        }
    }

    // --- Deferred validation ---

    /// Defer validation of `field` until `prerequisite` is released. The field
    /// carries a `queued` error until then.
    pub fn queue_validation(&mut self, field: &str, prerequisite: &str) -> Result<(), ResourceError> {
        if !self.schema.has_attribute(field) && !self.schema.has_relationship(field) {
            return Err(unknown_field(self.identity(), FieldKind::Field, field));
        }

        let queued = self
            .validation_queue
            .entry(prerequisite.to_string())
            .or_default();
        if !queued.iter().any(|f| f == field) {
            queued.push(field.to_string());
        }

        let error = ErrorObject::new(422, "Validation queued")?
            .with_detail(format!("'{field}' is awaiting '{prerequisite}'"))
            .with_code(QUEUED_ERROR_KEY);
        self.add_named_error(field, QUEUED_ERROR_KEY, error);
        Ok(())
    }

    /// Fields currently waiting on `prerequisite`.
    pub fn queued_validations(&self, prerequisite: &str) -> &[String] {
        self.validation_queue
            .get(prerequisite)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Re-run every validation queued against `prerequisite`: clear the
    /// field's `queued` error, then invoke its own setter with its current
    /// value.
    ///
    /// Every queued field is re-run even if an earlier setter fails; the
    /// first failure is returned once all of them have been processed.
    pub fn release_validations(&mut self, prerequisite: &str) -> Result<(), ResourceError> {
        let Some(fields) = self.validation_queue.remove(prerequisite) else {
            return Ok(());
        };
        debug!(
            resource = %self.identity(),
            prerequisite,
            count = fields.len(),
            "Releasing queued validations"
        );

        let mut first_error = None;
        for field in fields {
            self.remove_named_error(&field, QUEUED_ERROR_KEY);
            if let Err(e) = self.rerun_setter(&field) {
                warn!(resource = %self.identity(), field = %field, error = %e, "Queued validation failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn rerun_setter(&mut self, field: &str) -> Result<(), ResourceError> {
        if let Some(def) = self.schema.attribute(field) {
            let setter = Arc::clone(&def.setter);
            let current = self.attributes.get(field).cloned().unwrap_or(Value::Null);
            setter(self, current)
        } else if let Some(def) = self.schema.relationship(field) {
            let setter = Arc::clone(&def.setter);
            let current = self
                .peek_relationship(field)
                .cloned()
                .unwrap_or_else(|| Relationship::new(field));
            setter(self, current)
        } else {
            Ok(())
        }
    }

    // --- Datasource round trips ---

    /// Load full data from the datasource unless already initialized.
    /// A resource without an id has nothing to load.
    pub fn initialize(&mut self) -> Result<(), ResourceError> {
        if self.id.is_none() || self.initialized {
            return Ok(());
        }
        self.refresh()
    }

    /// Reload from the datasource regardless of current state.
    /// A resource without an id has nothing to load.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::ResourceNotFound` if the datasource no longer
    /// holds this resource.
    pub fn refresh(&mut self) -> Result<(), ResourceError> {
        let Some(id) = self.id.clone() else {
            return Ok(());
        };
        let Some(datasource) = self.datasource.clone() else {
            return Ok(());
        };
        let resource_type = self.resource_type.clone().unwrap_or_default();

        debug!(resource = %self.identity(), "Refreshing from datasource");
        let data = datasource
            .load(&resource_type, &id)?
            .ok_or(ResourceError::ResourceNotFound { resource_type, id })?;

        self.initialized_relationships.clear();
        self.hydrate(&data)
    }

    /// Persist through the datasource, adopt the stored id and start a fresh
    /// change-tracking checkpoint.
    pub fn save(&mut self) -> Result<(), ResourceError> {
        let Some(datasource) = self.datasource.clone() else {
            return Err(ResourceError::Datasource {
                message: format!("{} has no datasource to save to", self.identity()),
            });
        };

        let id = datasource.save(self)?;
        self.set_id(id)?;
        self.initialized = true;
        self.reset_changes();
        debug!(resource = %self.identity(), "Saved");
        Ok(())
    }

    /// Remove this resource from the datasource. Unsaved resources and
    /// already-deleted ones succeed without effect.
    pub fn delete(&self) -> Result<(), ResourceError> {
        let (Some(datasource), Some(ident)) = (&self.datasource, self.identifier()) else {
            return Ok(());
        };
        debug!(resource = %self.identity(), "Deleting");
        datasource.delete(&ident.resource_type, &ident.id)
    }

    /// Relationships worth serializing: un-hydrated to-many relationships
    /// with nothing in them are left out.
    fn serializable_relationships(&self) -> Vec<&Relationship> {
        self.relationships
            .iter()
            .filter(|rel| {
                let to_many = self
                    .schema
                    .relationship(rel.name())
                    .is_some_and(|def| def.cardinality == Cardinality::ToMany);
                !(to_many && rel.is_bare() && !self.is_relationship_hydrated(rel.name()))
            })
            .collect()
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("resource_type", &self.resource_type)
            .field("id", &self.id)
            .field("attributes", &self.attributes)
            .field("relationships", &self.relationships)
            .field("initialized", &self.initialized)
            .field("changed_attributes", &self.changed_attributes)
            .field("changed_relationships", &self.changed_relationships)
            .finish_non_exhaustive()
    }
}

struct RelationshipMap<'a>(Vec<&'a Relationship>);

impl Serialize for RelationshipMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for rel in &self.0 {
            map.serialize_entry(rel.name(), rel)?;
        }
        map.end()
    }
}

impl Serialize for Resource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", &self.resource_type)?;
        map.serialize_entry("id", &self.id)?;
        if !self.schema.attributes().is_empty() {
            map.serialize_entry("attributes", &self.attributes)?;
        }
        let relationships = self.serializable_relationships();
        if !relationships.is_empty() {
            map.serialize_entry("relationships", &RelationshipMap(relationships))?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn widgets() -> Arc<ResourceSchema> {
        ResourceSchema::builder("widgets")
            .attribute("name", json!(null))
            .attribute("size", json!(1))
            .to_one("owner")
            .build()
            .unwrap()
    }

    #[test]
    fn defaults_are_applied_without_tracking() {
        let r = Resource::new(widgets(), None, None).unwrap();
        assert_eq!(r.attribute("size"), Some(&json!(1)));
        assert_eq!(r.attribute("name"), Some(&json!(null)));
        assert!(!r.has_changes(None));
        assert!(!r.is_initialized());
    }

    #[test]
    fn id_is_write_once() {
        let mut r = Resource::new(widgets(), None, None).unwrap();
        r.set_id("1").unwrap();
        r.set_id("1").unwrap();
        let err = r.set_id("2").unwrap_err();
        assert!(matches!(err, ResourceError::DuplicateIdentity { field: "id", .. }));
        assert_eq!(r.id(), Some("1"));
    }

    #[test]
    fn conflicting_type_fails() {
        let mut r = Resource::new(widgets(), None, None).unwrap();
        let err = r.update_from_data(&json!({"type": "gadgets"})).unwrap_err();
        assert!(matches!(err, ResourceError::DuplicateIdentity { field: "type", .. }));
    }

    #[test]
    fn unknown_attributes_are_all_reported_and_nothing_is_written() {
        let mut r = Resource::new(widgets(), None, None).unwrap();
        let err = r
            .update_from_data(&json!({"attributes": {"name": "x", "colour": 1, "weight": 2}}))
            .unwrap_err();
        match err {
            ResourceError::UnknownField { kind, names, .. } => {
                assert_eq!(kind, FieldKind::Attribute);
                assert_eq!(names, vec!["colour", "weight"]);
            }
            other => panic!("expected UnknownField, got {other:?}"),
        }
        assert_eq!(r.attribute("name"), Some(&json!(null)));
    }

    #[test]
    fn leftover_top_level_keys_are_all_reported() {
        let mut r = Resource::new(widgets(), None, None).unwrap();
        let err = r
            .update_from_data(&json!({"attributes": {}, "links": {}, "extra": 1}))
            .unwrap_err();
        match err {
            ResourceError::MalformedInput { resource, keys } => {
                assert_eq!(resource, "widgets/(new)");
                assert_eq!(keys, vec!["links", "extra"]);
            }
            other => panic!("expected MalformedInput, got {other:?}"),
        }
    }

    #[test]
    fn latest_attribute_value_wins() {
        let mut r = Resource::new(widgets(), None, None).unwrap();
        r.apply_attribute("name", json!("a")).unwrap();
        r.apply_attribute("name", json!("b")).unwrap();
        assert!(r.has_changes(Some("name")));
        assert!(!r.has_changes(Some("size")));
        assert_eq!(r.change("name"), Some(FieldChange::Attribute(&json!("b"))));
        assert_eq!(r.changes().attributes.len(), 1);
    }

    #[test]
    fn same_to_one_target_is_not_a_change() {
        let mut r = Resource::new(widgets(), None, None).unwrap();
        let owner = ResourceIdentifier::new("people", "9");
        r.apply_relationship(Relationship::to_one("owner", owner.clone()))
            .unwrap();
        r.reset_changes();
        r.apply_relationship(Relationship::to_one("owner", owner))
            .unwrap();
        assert!(!r.has_changes(Some("owner")));
    }

    #[test]
    fn cardinality_is_enforced() {
        let mut r = Resource::new(widgets(), None, None).unwrap();
        let err = r
            .apply_relationship(Relationship::to_many("owner", vec![]))
            .unwrap_err();
        assert!(matches!(err, ResourceError::CardinalityMismatch { .. }));
    }

    #[test]
    fn tracking_flag_is_restored_after_failed_hydration() {
        let mut r = Resource::new(widgets(), None, None).unwrap();
        assert!(r.hydrate(&json!({"attributes": {"nope": 1}})).is_err());
        assert!(r.track_changes);
        r.apply_attribute("name", json!("x")).unwrap();
        assert!(r.has_changes(None));
    }

    #[test]
    fn read_only_write_is_recorded_not_thrown() {
        let schema = ResourceSchema::builder("accounts")
            .read_only_attribute("owner_email", json!(null))
            .attribute("label", json!(null))
            .build()
            .unwrap();
        let mut r = Resource::new(schema, None, None).unwrap();
        r.hydrate(&json!({"id": "1", "attributes": {"owner_email": "a@example.com"}}))
            .unwrap();

        r.update_from_data(&json!({"attributes": {"owner_email": "b@example.com", "label": "x"}}))
            .unwrap();
        assert_eq!(r.attribute("owner_email"), Some(&json!("a@example.com")));
        assert_eq!(r.attribute("label"), Some(&json!("x")));
        assert!(r.has_errors(Some("owner_email")));
        assert_eq!(r.errors(Some("owner_email")).first().unwrap().status(), 400);

        r.update_from_data_privileged(&json!({"attributes": {"owner_email": "b@example.com"}}))
            .unwrap();
        assert_eq!(r.attribute("owner_email"), Some(&json!("b@example.com")));
    }

    #[test]
    fn queued_validation_reruns_setter_once_with_current_value() {
        let calls: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        let schema = ResourceSchema::builder("orders")
            .attribute("currency", json!(null))
            .attribute_with("amount", json!(null), move |r, v| {
                seen.lock().unwrap().push(v.clone());
                r.set_attribute("amount", v)
            })
            .build()
            .unwrap();

        let mut r = Resource::new(schema, None, None).unwrap();
        r.apply_attribute("amount", json!(10)).unwrap();
        calls.lock().unwrap().clear();

        r.queue_validation("amount", "currency").unwrap();
        assert!(r.has_errors(Some("amount")));
        assert_eq!(r.queued_validations("currency"), ["amount".to_string()]);

        r.release_validations("currency").unwrap();
        assert!(!r.has_errors(Some("amount")));
        assert_eq!(*calls.lock().unwrap(), vec![json!(10)]);
        assert!(r.queued_validations("currency").is_empty());
    }

    #[test]
    fn setter_validation_errors_do_not_stop_siblings() {
        let rejected = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&rejected);
        let schema = ResourceSchema::builder("people")
            .attribute_with("email", json!(null), move |r, v| {
                if v.as_str().is_some_and(|s| !s.contains('@')) {
                    counter.fetch_add(1, Ordering::SeqCst);
                    r.add_error("email", ErrorObject::new(422, "Invalid email")?);
                    return Ok(());
                }
                r.set_attribute("email", v)
            })
            .attribute("name", json!(null))
            .build()
            .unwrap();

        let r = Resource::new(
            schema,
            None,
            Some(&json!({"attributes": {"email": "nope", "name": "Ann"}})),
        )
        .unwrap();
        assert_eq!(rejected.load(Ordering::SeqCst), 1);
        assert!(r.has_errors(Some("email")));
        assert_eq!(r.attribute("name"), Some(&json!("Ann")));
        assert_eq!(r.errors(None).len(), 1);
    }

    #[test]
    fn failing_queued_setter_does_not_strand_later_fields() {
        let total_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&total_calls);
        let schema = ResourceSchema::builder("orders")
            .attribute("currency", json!(null))
            .attribute_with("amount", json!(null), |r, v| {
                if v == json!("bad") {
                    return Err(ResourceError::Datasource {
                        message: "rate lookup failed".into(),
                    });
                }
                r.set_attribute("amount", v)
            })
            .attribute_with("total", json!(null), move |r, v| {
                counter.fetch_add(1, Ordering::SeqCst);
                r.set_attribute("total", v)
            })
            .build()
            .unwrap();

        let mut r = Resource::new(schema, None, None).unwrap();
        r.set_attribute("amount", json!("bad")).unwrap();
        r.queue_validation("amount", "currency").unwrap();
        r.queue_validation("total", "currency").unwrap();
        total_calls.store(0, Ordering::SeqCst);

        let err = r.release_validations("currency").unwrap_err();
        assert!(matches!(err, ResourceError::Datasource { .. }));
        assert_eq!(total_calls.load(Ordering::SeqCst), 1);
        assert!(!r.has_errors(Some("total")));
        assert!(!r.has_errors(Some("amount")));
        assert!(r.queued_validations("currency").is_empty());
    }

    #[test]
    fn queueing_unknown_name_reports_a_field() {
        let mut r = Resource::new(widgets(), None, None).unwrap();
        let err = r.queue_validation("colour", "size").unwrap_err();
        assert!(matches!(
            err,
            ResourceError::UnknownField { kind: FieldKind::Field, .. }
        ));
        assert_eq!(err.to_string(), "unknown field(s) for widgets/(new): colour");
        assert!(r.queued_validations("size").is_empty());
    }

    #[test]
    fn cardinality_mismatch_in_overlay_writes_nothing() {
        let mut r = Resource::new(widgets(), None, None).unwrap();
        let err = r
            .update_from_data(&json!({
                "attributes": {"name": "x"},
                "relationships": {"owner": {"data": []}}
            }))
            .unwrap_err();
        assert!(matches!(err, ResourceError::CardinalityMismatch { .. }));
        assert_eq!(r.attribute("name"), Some(&json!(null)));
        assert!(!r.has_changes(None));
    }

    #[test]
    fn id_conflict_in_overlay_writes_nothing() {
        let mut r = Resource::new(widgets(), None, Some(&json!({"id": "1"}))).unwrap();
        r.reset_changes();
        let err = r
            .update_from_data(&json!({"id": "2", "attributes": {"size": 9}}))
            .unwrap_err();
        assert!(matches!(err, ResourceError::DuplicateIdentity { field: "id", .. }));
        assert_eq!(r.attribute("size"), Some(&json!(1)));
        assert!(!r.has_changes(None));
    }

    #[test]
    fn read_only_attribute_keeps_custom_setter() {
        let schema = ResourceSchema::builder("accounts")
            .read_only_attribute_with("code", json!(null), |r, v| {
                let v = match v {
                    Value::String(s) => Value::String(s.to_uppercase()),
                    other => other,
                };
                r.set_attribute("code", v)
            })
            .build()
            .unwrap();
        assert!(schema.attribute("code").unwrap().read_only);

        let mut r = Resource::new(schema, None, None).unwrap();
        r.hydrate(&json!({"id": "1", "attributes": {"code": "ab"}}))
            .unwrap();
        assert_eq!(r.attribute("code"), Some(&json!("AB")));

        r.update_from_data(&json!({"attributes": {"code": "cd"}}))
            .unwrap();
        assert_eq!(r.attribute("code"), Some(&json!("AB")));
        assert!(r.has_errors(Some("code")));

        r.update_from_data_privileged(&json!({"attributes": {"code": "cd"}}))
            .unwrap();
        assert_eq!(r.attribute("code"), Some(&json!("CD")));
    }

    #[test]
    fn widgets_serialize_end_to_end() {
        let schema = ResourceSchema::builder("widgets")
            .attribute("name", json!(null))
            .build()
            .unwrap();
        let r = Resource::new(
            schema,
            None,
            Some(&json!({"type": "widgets", "attributes": {"name": "Acme"}})),
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(&r).unwrap(),
            json!({"type": "widgets", "id": null, "attributes": {"name": "Acme"}})
        );
    }
}
