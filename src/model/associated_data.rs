use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::model::{AssociatedDataSchema, Locale};

/// Key of an associated-data slot; same shape as an attribute key but the
/// two address different containers and never mix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssociatedDataKey {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<Locale>,
}

impl AssociatedDataKey {
    pub fn global(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locale: None,
        }
    }

    pub fn localized(name: impl Into<String>, locale: impl Into<Locale>) -> Self {
        Self {
            name: name.into(),
            locale: Some(locale.into()),
        }
    }

    pub fn is_localized(&self) -> bool {
        self.locale.is_some()
    }
}

impl fmt::Display for AssociatedDataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.locale {
            Some(locale) => write!(f, "{}:{}", self.name, locale),
            None => f.write_str(&self.name),
        }
    }
}

/// Immutable versioned associated-data record. Unlike attributes the payload
/// may be an arbitrarily nested structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociatedDataValue {
    pub key: AssociatedDataKey,
    pub value: serde_json::Value,
    pub version: u32,
    #[serde(default)]
    pub dropped: bool,
}

impl crate::model::keyed_map::Keyed for AssociatedDataValue {
    type Key = AssociatedDataKey;

    fn map_key(&self) -> AssociatedDataKey {
        self.key.clone()
    }
}

impl AssociatedDataValue {
    pub fn initial(key: AssociatedDataKey, value: serde_json::Value) -> Self {
        Self {
            key,
            value,
            version: 1,
            dropped: false,
        }
    }

    pub fn next(&self, value: serde_json::Value) -> Self {
        Self {
            key: self.key.clone(),
            value,
            version: self.version + 1,
            dropped: false,
        }
    }

    pub fn drop_next(&self) -> Self {
        Self {
            key: self.key.clone(),
            value: self.value.clone(),
            version: self.version + 1,
            dropped: true,
        }
    }

    pub fn exists(&self) -> bool {
        !self.dropped
    }
}

/// Immutable associated-data container, structured like [`crate::model::Attributes`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AssociatedData {
    #[serde(with = "crate::model::keyed_map")]
    pub values: BTreeMap<AssociatedDataKey, AssociatedDataValue>,
    pub schemas: BTreeMap<String, AssociatedDataSchema>,
}

impl AssociatedData {
    pub fn new(
        values: BTreeMap<AssociatedDataKey, AssociatedDataValue>,
        schemas: BTreeMap<String, AssociatedDataSchema>,
    ) -> Self {
        Self { values, schemas }
    }

    pub fn empty(schemas: BTreeMap<String, AssociatedDataSchema>) -> Self {
        Self {
            values: BTreeMap::new(),
            schemas,
        }
    }

    pub fn get_raw(&self, key: &AssociatedDataKey) -> Option<&AssociatedDataValue> {
        self.values.get(key)
    }

    pub fn get(&self, key: &AssociatedDataKey) -> Option<&AssociatedDataValue> {
        self.values.get(key).filter(|v| v.exists())
    }

    /// Locale-fallback lookup, same contract as the attribute container.
    pub fn get_with_fallback(
        &self,
        name: &str,
        locale: Option<&Locale>,
    ) -> Option<&AssociatedDataValue> {
        if let Some(locale) = locale {
            let localized = AssociatedDataKey::localized(name, locale.clone());
            if let Some(value) = self.get(&localized) {
                return Some(value);
            }
        }
        self.get(&AssociatedDataKey::global(name))
    }

    pub fn names(&self) -> BTreeSet<&str> {
        self.values
            .values()
            .filter(|v| v.exists())
            .map(|v| v.key.name.as_str())
            .collect()
    }

    pub fn locales(&self) -> BTreeSet<Locale> {
        self.values
            .values()
            .filter(|v| v.exists())
            .filter_map(|v| v.key.locale.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssociatedDataValue> {
        self.values.values().filter(|v| v.exists())
    }

    pub fn is_empty(&self) -> bool {
        self.values.values().all(|v| v.dropped)
    }
}
