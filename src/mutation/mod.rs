//! The mutation language: fine-grained, pure local mutations plus the wire
//! envelope the external session layer transmits. Each mutation kind is a
//! stateless `(schema, previous) -> new` transformation; no-ops are signaled
//! by returning a version equal to the previous one.

pub mod associated_data;
pub mod attribute;
pub mod parent;
pub mod price;
pub mod reference;

pub use associated_data::*;
pub use attribute::*;
pub use parent::*;
pub use price::*;
pub use reference::*;

use serde::{Deserialize, Serialize};

/// One entry of a change-set: a mutation scoped to a single leaf of one
/// entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LocalMutation {
    Parent(ParentMutation),
    Attribute(AttributeMutation),
    AssociatedData(AssociatedDataMutation),
    InnerRecordHandling(SetPriceInnerRecordHandlingMutation),
    Price(PriceMutation),
    Reference(ReferenceMutation),
}

/// Server-side expectation about the entity's existence when the change-set
/// is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityExistence {
    MustExist,
    MustNotExist,
}

/// Envelope handed to the external session layer for transmission: the
/// minimal, canonically ordered change-set for one entity.
///
/// Canonical order: the parent mutation first, then attribute,
/// associated-data, inner-record-handling, price and reference mutations,
/// each group in stable key order. Replays of the same envelope are
/// reproducible byte for byte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityUpsertMutation {
    pub entity_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<i32>,
    pub existence: EntityExistence,
    pub mutations: Vec<LocalMutation>,
}

impl EntityUpsertMutation {
    pub fn new(
        entity_type: impl Into<String>,
        primary_key: Option<i32>,
        existence: EntityExistence,
        mutations: Vec<LocalMutation>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            primary_key,
            existence,
            mutations,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AttributeKey;

    #[test]
    fn envelope_round_trips_through_json() {
        let envelope = EntityUpsertMutation::new(
            "product",
            Some(1),
            EntityExistence::MustExist,
            vec![
                LocalMutation::Parent(ParentMutation::set(5)),
                LocalMutation::Attribute(AttributeMutation::upsert(
                    AttributeKey::global("code"),
                    "ABC".into(),
                )),
            ],
        );

        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: EntityUpsertMutation = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, envelope);
    }
}
