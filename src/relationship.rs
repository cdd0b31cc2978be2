//! Relationships between resources, carried as identifiers only.
//!
//! A relationship never embeds the related resource's body. Serializing only
//! `(type, id)` pairs keeps mutually-referencing resources from recursing.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::collections::Meta;
use crate::error::ResourceError;
use crate::link::LinksCollection;
use crate::types::json_type_name;

const RELATIONSHIP_KEYS: &[&str] = &["data", "links", "meta"];

/// The `(type, id)` pair naming a resource without its body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResourceIdentifier {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: String,
}

impl ResourceIdentifier {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Parse `{type, id}`. Any other members (attributes of a full resource
    /// object, meta) are dropped.
    pub fn from_value(relationship: &str, value: &Value) -> Result<Self, ResourceError> {
        let shape_error = |message: String| ResourceError::UnresolvedRelationshipShape {
            name: relationship.to_string(),
            message,
        };

        let Value::Object(map) = value else {
            return Err(shape_error(format!(
                "expected resource identifier object, got {}",
                json_type_name(value)
            )));
        };

        let resource_type = map.get("type").and_then(Value::as_str);
        let id = match map.get("id") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        match (resource_type, id) {
            (Some(t), Some(id)) => Ok(Self::new(t, id)),
            (None, _) => Err(shape_error("resource identifier is missing 'type'".into())),
            (_, None) => Err(shape_error("resource identifier is missing 'id'".into())),
        }
    }

    /// Identity match: same id and same type.
    pub fn matches(&self, other: &ResourceIdentifier) -> bool {
        self.id == other.id && self.resource_type == other.resource_type
    }
}

/// Relationship payload: null, a single reference, or a homogeneous list of
/// references.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RelationshipData {
    #[default]
    Null,
    One(ResourceIdentifier),
    Many(Vec<ResourceIdentifier>),
}

impl RelationshipData {
    /// Parse relationship `data`.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::UnresolvedRelationshipShape` when the payload is
    /// neither null, an identifier object, nor an array of identifier objects.
    pub fn from_value(relationship: &str, value: &Value) -> Result<Self, ResourceError> {
        match value {
            Value::Null => Ok(RelationshipData::Null),
            Value::Object(_) => Ok(RelationshipData::One(ResourceIdentifier::from_value(
                relationship,
                value,
            )?)),
            Value::Array(items) => {
                if let Some(bad) = items.iter().find(|v| !v.is_object()) {
                    return Err(ResourceError::UnresolvedRelationshipShape {
                        name: relationship.to_string(),
                        message: format!(
                            "collection mixes identifiers with {}",
                            json_type_name(bad)
                        ),
                    });
                }
                items
                    .iter()
                    .map(|v| ResourceIdentifier::from_value(relationship, v))
                    .collect::<Result<Vec<_>, _>>()
                    .map(RelationshipData::Many)
            }
            other => Err(ResourceError::UnresolvedRelationshipShape {
                name: relationship.to_string(),
                message: format!(
                    "expected null, object or array, got {}",
                    json_type_name(other)
                ),
            }),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RelationshipData::Null)
    }

    pub fn is_many(&self) -> bool {
        matches!(self, RelationshipData::Many(_))
    }

    /// Referenced identifiers, in stored order.
    pub fn identifiers(&self) -> &[ResourceIdentifier] {
        match self {
            RelationshipData::Null => &[],
            RelationshipData::One(ident) => std::slice::from_ref(ident),
            RelationshipData::Many(idents) => idents,
        }
    }

    fn sorted_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.identifiers().iter().map(|i| i.id.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    /// Whether replacing `self` with `other` is a logical change.
    ///
    /// To-one values compare by id; to-many values compare their sorted id
    /// lists, so ordering differences are not changes.
    pub fn differs_from(&self, other: &RelationshipData) -> bool {
        use RelationshipData::*;
        match (self, other) {
            (Null, Null) => false,
            (One(a), One(b)) => a.id != b.id,
            (Many(_) | Null, Many(_) | Null) => self.sorted_ids() != other.sorted_ids(),
            _ => true,
        }
    }
}

impl Serialize for RelationshipData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RelationshipData::Null => serializer.serialize_none(),
            RelationshipData::One(ident) => ident.serialize(serializer),
            RelationshipData::Many(idents) => idents.serialize(serializer),
        }
    }
}

/// A named pointer from a resource to related resource identifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    name: String,
    data: RelationshipData,
    links: Option<LinksCollection>,
    meta: Option<Meta>,
}

impl Relationship {
    /// A relationship with null data.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: RelationshipData::Null,
            links: None,
            meta: None,
        }
    }

    pub fn to_one(name: impl Into<String>, target: ResourceIdentifier) -> Self {
        Self::new(name).with_data(RelationshipData::One(target))
    }

    pub fn to_many(name: impl Into<String>, targets: Vec<ResourceIdentifier>) -> Self {
        Self::new(name).with_data(RelationshipData::Many(targets))
    }

    pub fn with_data(mut self, data: RelationshipData) -> Self {
        self.data = data;
        self
    }

    pub fn with_links(mut self, links: LinksCollection) -> Self {
        self.links = Some(links);
        self
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Normalize a relationship object `{data?, links?, meta?}` under `name`.
    pub fn from_value(name: &str, value: &Value) -> Result<Self, ResourceError> {
        let Value::Object(map) = value else {
            return Err(ResourceError::UnresolvedRelationshipShape {
                name: name.to_string(),
                message: format!("expected relationship object, got {}", json_type_name(value)),
            });
        };

        let unknown: Vec<&str> = map
            .keys()
            .map(String::as_str)
            .filter(|k| !RELATIONSHIP_KEYS.contains(k))
            .collect();
        if !unknown.is_empty() {
            return Err(ResourceError::UnresolvedRelationshipShape {
                name: name.to_string(),
                message: format!("unrecognized key(s) {}", unknown.join(", ")),
            });
        }

        let mut relationship = Relationship::new(name);
        if let Some(data) = map.get("data") {
            relationship.data = RelationshipData::from_value(name, data)?;
        }
        if let Some(links) = map.get("links") {
            relationship.links = Some(LinksCollection::from_value(links)?);
        }
        if let Some(meta) = map.get("meta") {
            relationship.meta = Some(Meta::from_value(meta)?);
        }
        Ok(relationship)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &RelationshipData {
        &self.data
    }

    pub fn links(&self) -> Option<&LinksCollection> {
        self.links.as_ref()
    }

    pub fn meta(&self) -> Option<&Meta> {
        self.meta.as_ref()
    }

    /// Position of `target` among the referenced identifiers, by (id, type).
    pub fn index_of(&self, target: &ResourceIdentifier) -> Option<usize> {
        self.data
            .identifiers()
            .iter()
            .position(|ident| ident.matches(target))
    }

    pub fn contains(&self, target: &ResourceIdentifier) -> bool {
        self.index_of(target).is_some()
    }

    /// Append `target` to a to-many payload (null becomes an empty list first).
    /// Already-present members are left alone.
    pub(crate) fn push(&mut self, target: ResourceIdentifier) {
        if self.contains(&target) {
            return;
        }
        match &mut self.data {
            RelationshipData::Many(idents) => idents.push(target),
            _ => self.data = RelationshipData::Many(vec![target]),
        }
    }

    /// Drop `target` from a to-many payload. Returns whether anything was removed.
    pub(crate) fn remove(&mut self, target: &ResourceIdentifier) -> bool {
        match &mut self.data {
            RelationshipData::Many(idents) => {
                let before = idents.len();
                idents.retain(|ident| !ident.matches(target));
                idents.len() != before
            }
            _ => false,
        }
    }

    /// Whether this relationship omits any content worth serializing.
    pub(crate) fn is_bare(&self) -> bool {
        self.data.is_null() && self.links.is_none() && self.meta.is_none()
    }
}

impl Serialize for Relationship {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("data", &self.data)?;
        if let Some(links) = &self.links {
            map.serialize_entry("links", links)?;
        }
        if let Some(meta) = &self.meta {
            map.serialize_entry("meta", meta)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ident(t: &str, id: &str) -> ResourceIdentifier {
        ResourceIdentifier::new(t, id)
    }

    #[test]
    fn to_one_change_compares_ids() {
        let a = RelationshipData::One(ident("people", "1"));
        let same = RelationshipData::One(ident("people", "1"));
        let other = RelationshipData::One(ident("people", "2"));
        assert!(!a.differs_from(&same));
        assert!(a.differs_from(&other));
        assert!(a.differs_from(&RelationshipData::Null));
        assert!(!RelationshipData::Null.differs_from(&RelationshipData::Null));
    }

    #[test]
    fn to_many_change_ignores_order() {
        let a = RelationshipData::Many(vec![ident("tags", "1"), ident("tags", "2")]);
        let b = RelationshipData::Many(vec![ident("tags", "2"), ident("tags", "1")]);
        let c = RelationshipData::Many(vec![ident("tags", "2")]);
        assert!(!a.differs_from(&b));
        assert!(a.differs_from(&c));
        assert!(!RelationshipData::Null.differs_from(&RelationshipData::Many(vec![])));
    }

    #[test]
    fn rejects_mixed_collections() {
        let err = RelationshipData::from_value("tags", &json!([{"type": "tags", "id": "1"}, "2"]))
            .unwrap_err();
        assert!(matches!(
            err,
            ResourceError::UnresolvedRelationshipShape { .. }
        ));
        assert!(RelationshipData::from_value("tags", &json!("1")).is_err());
    }

    #[test]
    fn serializes_identifiers_only() {
        let raw = json!({
            "data": {"type": "people", "id": "9", "attributes": {"name": "Ann"}},
            "links": {"related": "/widgets/1/owner"}
        });
        let rel = Relationship::from_value("owner", &raw).unwrap();
        assert_eq!(
            serde_json::to_value(&rel).unwrap(),
            json!({
                "data": {"type": "people", "id": "9"},
                "links": {"related": "/widgets/1/owner"}
            })
        );
    }

    #[test]
    fn membership_uses_id_and_type() {
        let mut rel = Relationship::to_many("parts", vec![ident("parts", "1")]);
        assert!(rel.contains(&ident("parts", "1")));
        assert!(!rel.contains(&ident("bolts", "1")));
        rel.push(ident("parts", "1"));
        rel.push(ident("parts", "2"));
        assert_eq!(rel.index_of(&ident("parts", "2")), Some(1));
        assert!(!rel.remove(&ident("parts", "7")));
        assert!(rel.remove(&ident("parts", "1")));
        assert_eq!(rel.data().identifiers().len(), 1);
    }

    #[test]
    fn unknown_relationship_members_are_rejected() {
        let err = Relationship::from_value("owner", &json!({"data": null, "href": "/x"})).unwrap_err();
        assert!(err.to_string().contains("href"));
    }
}
