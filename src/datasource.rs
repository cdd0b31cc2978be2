//! The persistence boundary consumed by resources and the factory.
//!
//! Every call is blocking and returns a complete result or fails. Resources
//! hold the datasource behind an `Arc` and only reach it for hydration,
//! lazy to-many fetches, save and delete.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ResourceError;
use crate::relationship::{RelationshipData, ResourceIdentifier};
use crate::resource::Resource;

/// Lookup criteria for [`Datasource::query`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Restrict to one id.
    pub id: Option<String>,
    /// Attribute equality filters, all of which must match.
    pub filters: Vec<(String, Value)>,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            filters: Vec::new(),
        }
    }

    pub fn filter(mut self, attribute: impl Into<String>, value: Value) -> Self {
        self.filters.push((attribute.into(), value));
        self
    }
}

/// Supplies persisted data and executes persistence for resources.
pub trait Datasource: Send + Sync {
    /// Park a payload for the next resource constructed against this datasource.
    fn stage_current_data(&self, data: Value);

    /// Return and clear the parked payload. A one-shot handshake, not a query.
    fn take_current_data(&self) -> Option<Value>;

    /// Fetch the stored resource object for `(resource_type, id)`.
    fn load(&self, resource_type: &str, id: &str) -> Result<Option<Value>, ResourceError>;

    /// Fetch stored resource objects of one type matching `query`.
    fn query(&self, resource_type: &str, query: &Query) -> Result<Vec<Value>, ResourceError>;

    /// Resolve the members of a to-many relationship of `owner`.
    fn get_related(
        &self,
        owner: &ResourceIdentifier,
        relationship: &str,
    ) -> Result<Vec<ResourceIdentifier>, ResourceError>;

    /// Persist `resource`, returning the id it is stored under.
    fn save(&self, resource: &Resource) -> Result<String, ResourceError>;

    /// Remove a stored resource. Removing an absent resource succeeds.
    fn delete(&self, resource_type: &str, id: &str) -> Result<(), ResourceError>;
}

/// Map-backed datasource, used as the reference collaborator and in tests.
///
/// Records are stored as serialized resource objects keyed by `(type, id)`.
/// New resources get sequential numeric ids.
#[derive(Debug, Default)]
pub struct InMemoryDatasource {
    records: Mutex<BTreeMap<(String, String), Value>>,
    pending: Mutex<Option<Value>>,
    next_id: AtomicU64,
    related_calls: Mutex<BTreeMap<String, usize>>,
    save_calls: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryDatasource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a stored record. The record must carry string `type` and `id`.
    pub fn insert(&self, record: Value) -> Result<(), ResourceError> {
        let ident = record_identifier(&record)?;
        if let Ok(n) = ident.id.parse::<u64>() {
            self.next_id.fetch_max(n, Ordering::SeqCst);
        }
        lock(&self.records).insert((ident.resource_type, ident.id), record);
        Ok(())
    }

    pub fn contains(&self, resource_type: &str, id: &str) -> bool {
        lock(&self.records).contains_key(&(resource_type.to_string(), id.to_string()))
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `get_related` calls made for relationship `name`.
    pub fn related_calls(&self, name: &str) -> usize {
        lock(&self.related_calls).get(name).copied().unwrap_or(0)
    }

    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }
}

fn record_identifier(record: &Value) -> Result<ResourceIdentifier, ResourceError> {
    match (
        record.get("type").and_then(Value::as_str),
        record.get("id").and_then(Value::as_str),
    ) {
        (Some(t), Some(id)) => Ok(ResourceIdentifier::new(t, id)),
        _ => Err(ResourceError::Datasource {
            message: "stored records need string 'type' and 'id'".into(),
        }),
    }
}

fn matches_filters(record: &Value, filters: &[(String, Value)]) -> bool {
    filters.iter().all(|(name, expected)| {
        record
            .get("attributes")
            .and_then(|attrs| attrs.get(name))
            .is_some_and(|actual| actual == expected)
    })
}

impl Datasource for InMemoryDatasource {
    fn stage_current_data(&self, data: Value) {
        *lock(&self.pending) = Some(data);
    }

    fn take_current_data(&self) -> Option<Value> {
        lock(&self.pending).take()
    }

    fn load(&self, resource_type: &str, id: &str) -> Result<Option<Value>, ResourceError> {
        Ok(lock(&self.records)
            .get(&(resource_type.to_string(), id.to_string()))
            .cloned())
    }

    fn query(&self, resource_type: &str, query: &Query) -> Result<Vec<Value>, ResourceError> {
        let records = lock(&self.records);
        Ok(records
            .iter()
            .filter(|((t, id), _)| {
                t == resource_type && query.id.as_ref().map_or(true, |wanted| wanted == id)
            })
            .filter(|(_, record)| matches_filters(record, &query.filters))
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn get_related(
        &self,
        owner: &ResourceIdentifier,
        relationship: &str,
    ) -> Result<Vec<ResourceIdentifier>, ResourceError> {
        *lock(&self.related_calls)
            .entry(relationship.to_string())
            .or_insert(0) += 1;

        let records = lock(&self.records);
        let Some(data) = records
            .get(&(owner.resource_type.clone(), owner.id.clone()))
            .and_then(|record| record.pointer(&format!("/relationships/{relationship}/data")))
        else {
            return Ok(Vec::new());
        };

        match RelationshipData::from_value(relationship, data)? {
            RelationshipData::Many(idents) => Ok(idents),
            RelationshipData::One(ident) => Ok(vec![ident]),
            RelationshipData::Null => Ok(Vec::new()),
        }
    }

    fn save(&self, resource: &Resource) -> Result<String, ResourceError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);

        let resource_type = resource
            .resource_type()
            .ok_or(ResourceError::MissingType)?
            .to_string();
        let id = match resource.id() {
            Some(id) => {
                if let Ok(n) = id.parse::<u64>() {
                    self.next_id.fetch_max(n, Ordering::SeqCst);
                }
                id.to_string()
            }
            None => (self.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string(),
        };

        let mut record = serde_json::to_value(resource).map_err(|e| ResourceError::Datasource {
            message: format!("cannot serialize {}: {e}", resource.identity()),
        })?;
        if let Some(obj) = record.as_object_mut() {
            obj.insert("id".into(), Value::String(id.clone()));
        }

        let mut records = lock(&self.records);
        let key = (resource_type, id.clone());

        // Relationships that were never hydrated are absent from the
        // serialization; keep whatever was stored for them.
        if let Some(previous) = records.get(&key) {
            if let (Some(old), Some(obj)) = (
                previous.get("relationships").and_then(Value::as_object),
                record.as_object_mut(),
            ) {
                let rels = obj
                    .entry("relationships")
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Some(rels) = rels.as_object_mut() {
                    for (name, rel) in old {
                        if !rels.contains_key(name) {
                            rels.insert(name.clone(), rel.clone());
                        }
                    }
                }
            }
        }

        debug!(resource_type = %key.0, id = %key.1, "Stored record");
        records.insert(key, record);
        Ok(id)
    }

    fn delete(&self, resource_type: &str, id: &str) -> Result<(), ResourceError> {
        let removed = lock(&self.records)
            .remove(&(resource_type.to_string(), id.to_string()))
            .is_some();
        debug!(resource_type, id, removed, "Delete");
        Ok(())
    }
}
