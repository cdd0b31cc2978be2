//! Typed containers used throughout the document model.
//!
//! Three capability variants, deliberately not a hierarchy:
//!
//! | Container | Keys | Constraint |
//! |-----------|------|------------|
//! | [`Sequence`] | integer only | element type fixed by `T` |
//! | [`NamedRegistry`] | string or auto-increment | unique member names |
//! | [`Meta`] | string | none (free-form JSON) |
//!
//! All three iterate in insertion order.

use serde::ser::{Error as _, SerializeMap};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::ResourceError;
use crate::types::json_type_name;

/// Key used when inserting into a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionKey {
    Index(usize),
    Name(String),
}

impl From<usize> for CollectionKey {
    fn from(index: usize) -> Self {
        CollectionKey::Index(index)
    }
}

impl From<&str> for CollectionKey {
    fn from(name: &str) -> Self {
        CollectionKey::Name(name.to_string())
    }
}

impl From<String> for CollectionKey {
    fn from(name: String) -> Self {
        CollectionKey::Name(name)
    }
}

/// Order-preserving, integer-indexed sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Sequence<T> {
    items: Vec<T>,
}

impl<T> Default for Sequence<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> Sequence<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    /// Insert at an integer key: replaces an existing slot or appends at `len()`.
    ///
    /// # Errors
    ///
    /// String keys and indices past the end are rejected with
    /// `ResourceError::InvalidKey`.
    pub fn insert(&mut self, key: impl Into<CollectionKey>, item: T) -> Result<(), ResourceError> {
        match key.into() {
            CollectionKey::Name(name) => Err(ResourceError::InvalidKey {
                key: name,
                message: "sequences accept integer keys only".into(),
            }),
            CollectionKey::Index(i) if i < self.items.len() => {
                self.items[i] = item;
                Ok(())
            }
            CollectionKey::Index(i) if i == self.items.len() => {
                self.items.push(item);
                Ok(())
            }
            CollectionKey::Index(i) => Err(ResourceError::InvalidKey {
                key: i.to_string(),
                message: format!("index past end of sequence of length {}", self.items.len()),
            }),
        }
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index)
    }

    pub fn remove(&mut self, index: usize) -> Option<T> {
        if index < self.items.len() {
            Some(self.items.remove(index))
        } else {
            None
        }
    }

    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T> From<Vec<T>> for Sequence<T> {
    fn from(items: Vec<T>) -> Self {
        Self { items }
    }
}

impl<T> FromIterator<T> for Sequence<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<T> IntoIterator for Sequence<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Sequence<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Elements of a [`NamedRegistry`] expose a stable member name.
pub trait Named {
    fn member_name(&self) -> Option<&str>;
}

/// Mapping keyed by string or auto-increment keys whose elements carry
/// unique member names. Serializes as an object keyed by member name.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedRegistry<T> {
    entries: Vec<(String, T)>,
    next_index: usize,
}

impl<T> Default for NamedRegistry<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_index: 0,
        }
    }
}

impl<T: Named> NamedRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append under the next auto-increment key.
    pub fn push(&mut self, item: T) -> Result<(), ResourceError> {
        let key = self.next_index.to_string();
        self.insert_keyed(key, item)
    }

    /// Insert under an explicit key, replacing whatever that key held.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::DuplicateMember` if another key already holds a
    /// member with the same name.
    pub fn insert(&mut self, key: impl Into<CollectionKey>, item: T) -> Result<(), ResourceError> {
        match key.into() {
            CollectionKey::Name(name) => self.insert_keyed(name, item),
            CollectionKey::Index(i) => {
                self.next_index = self.next_index.max(i + 1);
                self.insert_keyed(i.to_string(), item)
            }
        }
    }

    fn insert_keyed(&mut self, key: String, item: T) -> Result<(), ResourceError> {
        if let Some(name) = item.member_name() {
            let clash = self
                .entries
                .iter()
                .any(|(k, existing)| *k != key && existing.member_name() == Some(name));
            if clash {
                return Err(ResourceError::DuplicateMember {
                    name: name.to_string(),
                });
            }
        }

        if let Ok(index) = key.parse::<usize>() {
            self.next_index = self.next_index.max(index + 1);
        }

        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = item,
            None => self.entries.push((key, item)),
        }
        Ok(())
    }

    /// Look up by insertion key.
    pub fn get(&self, key: &str) -> Option<&T> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Look up by member name.
    pub fn by_name(&self, name: &str) -> Option<&T> {
        self.entries
            .iter()
            .map(|(_, v)| v)
            .find(|v| v.member_name() == Some(name))
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.by_name(name).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<T> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check the serialization preconditions: every member named, no two
    /// members sharing a name.
    pub fn validate(&self) -> Result<(), ResourceError> {
        let mut seen: Vec<&str> = Vec::with_capacity(self.entries.len());
        for (key, item) in &self.entries {
            let Some(name) = item.member_name() else {
                return Err(ResourceError::UnnamedMember { key: key.clone() });
            };
            if seen.contains(&name) {
                return Err(ResourceError::DuplicateMember {
                    name: name.to_string(),
                });
            }
            seen.push(name);
        }
        Ok(())
    }
}

impl<T: Named + Serialize> Serialize for NamedRegistry<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.validate().map_err(S::Error::custom)?;
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (_, item) in &self.entries {
            // validate() guarantees every member is named
            if let Some(name) = item.member_name() {
                map.serialize_entry(name, item)?;
            }
        }
        map.end()
    }
}

/// Free-form metadata mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Meta {
    members: Map<String, Value>,
}

impl Meta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::InvalidKey` if `value` is not an object.
    pub fn from_value(value: &Value) -> Result<Self, ResourceError> {
        match value {
            Value::Object(map) => Ok(Self {
                members: map.clone(),
            }),
            other => Err(ResourceError::InvalidKey {
                key: "meta".into(),
                message: format!("expected object, got {}", json_type_name(other)),
            }),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.members.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.members.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.members.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.members.clone())
    }
}

impl From<Map<String, Value>> for Meta {
    fn from(members: Map<String, Value>) -> Self {
        Self { members }
    }
}
