use serde::{Deserialize, Serialize};

use crate::error::{EntityError, Result};
use crate::model::EntitySchema;

/// Places the entity under a hierarchy parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetParentMutation {
    pub parent: i32,
}

/// Takes the entity out of the hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveParentMutation;

/// Hierarchy placement mutation. The parent link is a plain entity-level
/// field, so the "value" here is `Option<i32>` rather than a versioned
/// record; the entity version accounts for the change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParentMutation {
    Set(SetParentMutation),
    Remove(RemoveParentMutation),
}

impl ParentMutation {
    pub fn set(parent: i32) -> Self {
        Self::Set(SetParentMutation { parent })
    }

    pub fn remove() -> Self {
        Self::Remove(RemoveParentMutation)
    }

    /// Pure local transformation of the parent link.
    pub fn mutate_local(
        &self,
        schema: &EntitySchema,
        previous: Option<i32>,
    ) -> Result<Option<i32>> {
        schema.verify_hierarchy()?;
        match self {
            Self::Set(m) => Ok(Some(m.parent)),
            Self::Remove(_) => {
                if previous.is_none() {
                    return Err(EntityError::MissingTarget {
                        kind: "parent",
                        key: "hierarchy placement".to_string(),
                    });
                }
                Ok(None)
            }
        }
    }
}
