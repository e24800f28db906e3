use serde::{Deserialize, Serialize};

use crate::error::{EntityError, Result};
use crate::model::{AssociatedDataKey, AssociatedDataValue, EntitySchema};

/// Sets an associated-data value, creating the slot when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertAssociatedDataMutation {
    pub key: AssociatedDataKey,
    pub value: serde_json::Value,
}

/// Tombstones an associated-data value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveAssociatedDataMutation {
    pub key: AssociatedDataKey,
}

/// A single associated-data mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AssociatedDataMutation {
    Upsert(UpsertAssociatedDataMutation),
    Remove(RemoveAssociatedDataMutation),
}

impl AssociatedDataMutation {
    pub fn upsert(key: AssociatedDataKey, value: serde_json::Value) -> Self {
        Self::Upsert(UpsertAssociatedDataMutation { key, value })
    }

    pub fn remove(key: AssociatedDataKey) -> Self {
        Self::Remove(RemoveAssociatedDataMutation { key })
    }

    pub fn key(&self) -> &AssociatedDataKey {
        match self {
            Self::Upsert(m) => &m.key,
            Self::Remove(m) => &m.key,
        }
    }

    /// Pure local transformation; same no-op/version contract as attribute
    /// mutations.
    pub fn mutate_local(
        &self,
        schema: &EntitySchema,
        previous: Option<&AssociatedDataValue>,
    ) -> Result<AssociatedDataValue> {
        if let Self::Upsert(m) = self {
            schema.verify_associated_data(&m.key, &m.value)?;
        }
        self.apply_unchecked(previous)
    }

    pub(crate) fn apply_unchecked(
        &self,
        previous: Option<&AssociatedDataValue>,
    ) -> Result<AssociatedDataValue> {
        match self {
            Self::Upsert(m) => Ok(match previous {
                None => AssociatedDataValue::initial(m.key.clone(), m.value.clone()),
                Some(prev) if prev.exists() && prev.value == m.value => prev.clone(),
                Some(prev) => prev.next(m.value.clone()),
            }),
            Self::Remove(m) => match previous {
                Some(prev) if prev.exists() => Ok(prev.drop_next()),
                _ => Err(EntityError::MissingTarget {
                    kind: "associated data",
                    key: m.key.to_string(),
                }),
            },
        }
    }
}
