use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::model::{AttributeSchema, Locale};

/// Key of a single attribute slot. A locale-carrying key addresses a
/// localized slot, a locale-less key the global slot of the same name; the
/// two never shadow each other in storage.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttributeKey {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<Locale>,
}

impl AttributeKey {
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

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.locale {
            Some(locale) => write!(f, "{}:{}", self.name, locale),
            None => f.write_str(&self.name),
        }
    }
}

/// Immutable versioned attribute record. A `dropped` record is a tombstone:
/// invisible to readers but kept so a later diff can tell "existed, then
/// removed" apart from "never existed".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub key: AttributeKey,
    pub value: serde_json::Value,
    pub version: u32,
    #[serde(default)]
    pub dropped: bool,
}

impl crate::model::keyed_map::Keyed for AttributeValue {
    type Key = AttributeKey;

    fn map_key(&self) -> AttributeKey {
        self.key.clone()
    }
}

impl AttributeValue {
    /// First version of a freshly set attribute.
    pub fn initial(key: AttributeKey, value: serde_json::Value) -> Self {
        Self {
            key,
            value,
            version: 1,
            dropped: false,
        }
    }

    /// Next version carrying a replacement value.
    pub fn next(&self, value: serde_json::Value) -> Self {
        Self {
            key: self.key.clone(),
            value,
            version: self.version + 1,
            dropped: false,
        }
    }

    /// Tombstone for this record.
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

/// Immutable attribute container: versioned values keyed by `AttributeKey`
/// plus the attribute schemas known to this container (declared ones and any
/// implicitly synthesized during evolution).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Attributes {
    #[serde(with = "crate::model::keyed_map")]
    pub values: BTreeMap<AttributeKey, AttributeValue>,
    pub schemas: BTreeMap<String, AttributeSchema>,
}

impl Attributes {
    pub fn new(
        values: BTreeMap<AttributeKey, AttributeValue>,
        schemas: BTreeMap<String, AttributeSchema>,
    ) -> Self {
        Self { values, schemas }
    }

    /// Empty container carrying only the declared schemas.
    pub fn empty(schemas: BTreeMap<String, AttributeSchema>) -> Self {
        Self {
            values: BTreeMap::new(),
            schemas,
        }
    }

    /// Raw record lookup, tombstones included. Diffing goes through this.
    pub fn get_raw(&self, key: &AttributeKey) -> Option<&AttributeValue> {
        self.values.get(key)
    }

    /// Effective value under the exact key; tombstones are invisible.
    pub fn get(&self, key: &AttributeKey) -> Option<&AttributeValue> {
        self.values.get(key).filter(|v| v.exists())
    }

    /// Locale-fallback lookup: a localized miss falls back to the global
    /// slot, while a global lookup never yields a localized value.
    pub fn get_with_fallback(
        &self,
        name: &str,
        locale: Option<&Locale>,
    ) -> Option<&AttributeValue> {
        if let Some(locale) = locale {
            let localized = AttributeKey::localized(name, locale.clone());
            if let Some(value) = self.get(&localized) {
                return Some(value);
            }
        }
        self.get(&AttributeKey::global(name))
    }

    /// Names of all live (non-tombstoned) attributes.
    pub fn names(&self) -> BTreeSet<&str> {
        self.values
            .values()
            .filter(|v| v.exists())
            .map(|v| v.key.name.as_str())
            .collect()
    }

    /// Keys of all live attributes.
    pub fn keys(&self) -> impl Iterator<Item = &AttributeKey> {
        self.values.values().filter(|v| v.exists()).map(|v| &v.key)
    }

    /// Locales used by live localized values.
    pub fn locales(&self) -> BTreeSet<Locale> {
        self.values
            .values()
            .filter(|v| v.exists())
            .filter_map(|v| v.key.locale.clone())
            .collect()
    }

    /// All live values.
    pub fn iter(&self) -> impl Iterator<Item = &AttributeValue> {
        self.values.values().filter(|v| v.exists())
    }

    pub fn is_empty(&self) -> bool {
        self.values.values().all(|v| v.dropped)
    }
}
