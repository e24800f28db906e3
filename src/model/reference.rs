use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::model::{Attributes, Cardinality, Locale};

/// Key of a reference: the reference kind plus the primary key of the
/// referenced entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReferenceKey {
    pub name: String,
    pub primary_key: i32,
}

impl ReferenceKey {
    pub fn new(name: impl Into<String>, primary_key: i32) -> Self {
        Self {
            name: name.into(),
            primary_key,
        }
    }
}

impl fmt::Display for ReferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.primary_key)
    }
}

/// Group a reference belongs to: an entity type plus primary key in that
/// type's collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    pub primary_key: i32,
}

impl GroupRef {
    pub fn new(entity_type: Option<String>, primary_key: i32) -> Self {
        Self {
            entity_type,
            primary_key,
        }
    }
}

/// Immutable versioned reference to another entity, carrying its own
/// attribute container and optional group assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub key: ReferenceKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referenced_entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cardinality: Option<Cardinality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupRef>,
    pub attributes: Attributes,
    pub version: u32,
    #[serde(default)]
    pub dropped: bool,
}

impl crate::model::keyed_map::Keyed for Reference {
    type Key = ReferenceKey;

    fn map_key(&self) -> ReferenceKey {
        self.key.clone()
    }
}

impl Reference {
    pub fn initial(
        key: ReferenceKey,
        referenced_entity_type: Option<String>,
        cardinality: Option<Cardinality>,
    ) -> Self {
        Self {
            key,
            referenced_entity_type,
            cardinality,
            group: None,
            attributes: Attributes::default(),
            version: 1,
            dropped: false,
        }
    }

    pub fn exists(&self) -> bool {
        !self.dropped
    }

    pub fn drop_next(&self) -> Self {
        Self {
            version: self.version + 1,
            dropped: true,
            ..self.clone()
        }
    }

    /// Next version carrying replacement group/attribute state.
    pub fn next_with(&self, group: Option<GroupRef>, attributes: Attributes) -> Self {
        Self {
            key: self.key.clone(),
            referenced_entity_type: self.referenced_entity_type.clone(),
            cardinality: self.cardinality,
            group,
            attributes,
            version: self.version + 1,
            dropped: false,
        }
    }
}

/// Immutable reference container keyed by [`ReferenceKey`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct References {
    #[serde(with = "crate::model::keyed_map")]
    pub values: BTreeMap<ReferenceKey, Reference>,
}

impl References {
    pub fn new(values: BTreeMap<ReferenceKey, Reference>) -> Self {
        Self { values }
    }

    pub fn get_raw(&self, key: &ReferenceKey) -> Option<&Reference> {
        self.values.get(key)
    }

    pub fn get(&self, key: &ReferenceKey) -> Option<&Reference> {
        self.values.get(key).filter(|r| r.exists())
    }

    /// All live references.
    pub fn iter(&self) -> impl Iterator<Item = &Reference> {
        self.values.values().filter(|r| r.exists())
    }

    /// Live references of one kind.
    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Reference> {
        self.iter().filter(move |r| r.key.name == name)
    }

    /// Locales used by reference attributes (contributes to nothing at the
    /// entity level; exposed for parity with the other containers).
    pub fn locales(&self) -> impl Iterator<Item = Locale> + '_ {
        self.iter().flat_map(|r| r.attributes.locales().into_iter())
    }

    pub fn is_empty(&self) -> bool {
        self.values.values().all(|r| r.dropped)
    }
}
