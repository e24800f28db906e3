use serde::{Deserialize, Serialize};

use crate::error::{EntityError, Result};
use crate::model::{AttributeKey, AttributeSchemaScope, AttributeValue};

/// Sets an attribute value, creating the slot when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertAttributeMutation {
    pub key: AttributeKey,
    pub value: serde_json::Value,
}

/// Tombstones an attribute value. Removing a value that never existed is an
/// error, not a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveAttributeMutation {
    pub key: AttributeKey,
}

/// A single attribute-level mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeMutation {
    Upsert(UpsertAttributeMutation),
    Remove(RemoveAttributeMutation),
}

impl AttributeMutation {
    pub fn upsert(key: AttributeKey, value: serde_json::Value) -> Self {
        Self::Upsert(UpsertAttributeMutation { key, value })
    }

    pub fn remove(key: AttributeKey) -> Self {
        Self::Remove(RemoveAttributeMutation { key })
    }

    pub fn key(&self) -> &AttributeKey {
        match self {
            Self::Upsert(m) => &m.key,
            Self::Remove(m) => &m.key,
        }
    }

    /// Pure local transformation `(scope, previous) -> new value`.
    ///
    /// The returned version equals the previous one iff the mutation caused
    /// no real change; callers detect no-ops by comparing versions.
    pub fn mutate_local(
        &self,
        scope: &impl AttributeSchemaScope,
        previous: Option<&AttributeValue>,
    ) -> Result<AttributeValue> {
        match self {
            Self::Upsert(m) => {
                scope.verify(&m.key, &m.value)?;
                self.apply_unchecked(previous)
            }
            Self::Remove(_) => self.apply_unchecked(previous),
        }
    }

    /// Transformation without schema validation, for replaying values that
    /// were already validated on entry.
    pub(crate) fn apply_unchecked(
        &self,
        previous: Option<&AttributeValue>,
    ) -> Result<AttributeValue> {
        match self {
            Self::Upsert(m) => Ok(match previous {
                None => AttributeValue::initial(m.key.clone(), m.value.clone()),
                Some(prev) if prev.exists() && prev.value == m.value => prev.clone(),
                Some(prev) => prev.next(m.value.clone()),
            }),
            Self::Remove(m) => match previous {
                Some(prev) if prev.exists() => Ok(prev.drop_next()),
                _ => Err(EntityError::MissingTarget {
                    kind: "attribute",
                    key: m.key.to_string(),
                }),
            },
        }
    }
}
