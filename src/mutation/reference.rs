use serde::{Deserialize, Serialize};

use crate::error::{EntityError, Result};
use crate::model::{
    AttributeSchemaScope, Cardinality, EntitySchema, GroupRef, Reference,
    ReferenceAttributeScope, ReferenceKey, ReferenceSchema,
};
use crate::mutation::AttributeMutation;

/// Creates a reference to another entity (or resurrects a tombstoned one).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertReferenceMutation {
    pub key: ReferenceKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referenced_entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cardinality: Option<Cardinality>,
}

/// Tombstones a reference including its attributes and group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveReferenceMutation {
    pub key: ReferenceKey,
}

/// Assigns the reference to a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetReferenceGroupMutation {
    pub key: ReferenceKey,
    pub group: GroupRef,
}

/// Clears the reference's group assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveReferenceGroupMutation {
    pub key: ReferenceKey,
}

/// Applies an attribute mutation to the attributes carried by one reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceAttributeMutation {
    pub key: ReferenceKey,
    pub mutation: AttributeMutation,
}

/// A single reference-level mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReferenceMutation {
    Insert(InsertReferenceMutation),
    Remove(RemoveReferenceMutation),
    SetGroup(SetReferenceGroupMutation),
    RemoveGroup(RemoveReferenceGroupMutation),
    Attribute(ReferenceAttributeMutation),
}

impl ReferenceMutation {
    pub fn insert(
        key: ReferenceKey,
        referenced_entity_type: Option<String>,
        cardinality: Option<Cardinality>,
    ) -> Self {
        Self::Insert(InsertReferenceMutation {
            key,
            referenced_entity_type,
            cardinality,
        })
    }

    pub fn remove(key: ReferenceKey) -> Self {
        Self::Remove(RemoveReferenceMutation { key })
    }

    pub fn set_group(key: ReferenceKey, group: GroupRef) -> Self {
        Self::SetGroup(SetReferenceGroupMutation { key, group })
    }

    pub fn remove_group(key: ReferenceKey) -> Self {
        Self::RemoveGroup(RemoveReferenceGroupMutation { key })
    }

    pub fn attribute(key: ReferenceKey, mutation: AttributeMutation) -> Self {
        Self::Attribute(ReferenceAttributeMutation { key, mutation })
    }

    pub fn key(&self) -> &ReferenceKey {
        match self {
            Self::Insert(m) => &m.key,
            Self::Remove(m) => &m.key,
            Self::SetGroup(m) => &m.key,
            Self::RemoveGroup(m) => &m.key,
            Self::Attribute(m) => &m.key,
        }
    }

    /// Pure local transformation of one reference; same no-op/version
    /// contract as the other mutation kinds.
    pub fn mutate_local(
        &self,
        schema: &EntitySchema,
        previous: Option<&Reference>,
    ) -> Result<Reference> {
        schema.verify_reference(&self.key().name)?;
        let live = previous.filter(|r| r.exists());
        match self {
            Self::Insert(m) => Ok(match (previous, live) {
                (_, Some(prev)) => {
                    if prev.referenced_entity_type == m.referenced_entity_type
                        && prev.cardinality == m.cardinality
                    {
                        prev.clone()
                    } else {
                        Reference {
                            referenced_entity_type: m.referenced_entity_type.clone(),
                            cardinality: m.cardinality,
                            version: prev.version + 1,
                            ..prev.clone()
                        }
                    }
                }
                // resurrecting a tombstone starts from a blank reference
                (Some(prev), None) => Reference {
                    version: prev.version + 1,
                    ..Reference::initial(
                        m.key.clone(),
                        m.referenced_entity_type.clone(),
                        m.cardinality,
                    )
                },
                (None, None) => Reference::initial(
                    m.key.clone(),
                    m.referenced_entity_type.clone(),
                    m.cardinality,
                ),
            }),
            Self::Remove(m) => match live {
                Some(prev) => Ok(prev.drop_next()),
                None => Err(EntityError::MissingTarget {
                    kind: "reference",
                    key: m.key.to_string(),
                }),
            },
            Self::SetGroup(m) => {
                let prev = live.ok_or_else(|| EntityError::MissingTarget {
                    kind: "reference",
                    key: m.key.to_string(),
                })?;
                if prev.group.as_ref() == Some(&m.group) {
                    Ok(prev.clone())
                } else {
                    Ok(prev.next_with(Some(m.group.clone()), prev.attributes.clone()))
                }
            }
            Self::RemoveGroup(m) => {
                let prev = live.ok_or_else(|| EntityError::MissingTarget {
                    kind: "reference",
                    key: m.key.to_string(),
                })?;
                if prev.group.is_none() {
                    return Err(EntityError::MissingTarget {
                        kind: "reference group",
                        key: m.key.to_string(),
                    });
                }
                Ok(prev.next_with(None, prev.attributes.clone()))
            }
            Self::Attribute(m) => {
                let prev = live.ok_or_else(|| EntityError::MissingTarget {
                    kind: "reference",
                    key: m.key.to_string(),
                })?;
                let implicit;
                let reference_schema = match schema.get_reference(&m.key.name) {
                    Some(declared) => declared,
                    None => {
                        implicit = ReferenceSchema::implicit(
                            &m.key.name,
                            prev.referenced_entity_type.as_deref(),
                        );
                        &implicit
                    }
                };
                let scope = ReferenceAttributeScope::new(schema, reference_schema);
                let base_value = prev.attributes.get_raw(m.mutation.key());
                let mutated = m.mutation.mutate_local(&scope, base_value)?;
                let base_version = base_value.map(|v| v.version).unwrap_or(0);
                if mutated.version <= base_version {
                    return Ok(prev.clone());
                }
                let mut attributes = prev.attributes.clone();
                if !attributes.schemas.contains_key(&mutated.key.name) {
                    attributes.schemas.insert(
                        mutated.key.name.clone(),
                        scope.schema_for(&mutated.key, &mutated.value),
                    );
                }
                attributes.values.insert(mutated.key.clone(), mutated);
                Ok(prev.next_with(prev.group.clone(), attributes))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AttributeKey;

    fn brand_key() -> ReferenceKey {
        ReferenceKey::new("brand", 42)
    }

    #[test]
    fn insert_creates_then_noops() {
        let schema = EntitySchema::open("product");
        let mutation = ReferenceMutation::insert(brand_key(), Some("brand".to_string()), None);

        let first = mutation.mutate_local(&schema, None).unwrap();
        assert_eq!(first.version, 1);

        let again = mutation.mutate_local(&schema, Some(&first)).unwrap();
        assert_eq!(again.version, 1);
    }

    #[test]
    fn insert_resurrects_tombstone_blank() {
        let schema = EntitySchema::open("product");
        let mutation = ReferenceMutation::insert(brand_key(), Some("brand".to_string()), None);
        let mut live = mutation.mutate_local(&schema, None).unwrap();
        live.group = Some(GroupRef::new(None, 7));
        let dropped = live.drop_next();

        let resurrected = mutation.mutate_local(&schema, Some(&dropped)).unwrap();
        assert_eq!(resurrected.version, 3);
        assert!(resurrected.exists());
        assert!(resurrected.group.is_none());
    }

    #[test]
    fn group_set_and_remove_track_versions() {
        let schema = EntitySchema::open("product");
        let reference = Reference::initial(brand_key(), None, None);
        let group = GroupRef::new(Some("brand-group".to_string()), 5);

        let set = ReferenceMutation::set_group(brand_key(), group.clone());
        let grouped = set.mutate_local(&schema, Some(&reference)).unwrap();
        assert_eq!(grouped.version, 2);
        assert_eq!(grouped.group, Some(group));

        // same group again is a no-op
        let again = set.mutate_local(&schema, Some(&grouped)).unwrap();
        assert_eq!(again.version, 2);

        let cleared = ReferenceMutation::remove_group(brand_key())
            .mutate_local(&schema, Some(&grouped))
            .unwrap();
        assert_eq!(cleared.version, 3);
        assert!(cleared.group.is_none());
    }

    #[test]
    fn remove_group_without_group_fails() {
        let schema = EntitySchema::open("product");
        let reference = Reference::initial(brand_key(), None, None);
        assert!(matches!(
            ReferenceMutation::remove_group(brand_key()).mutate_local(&schema, Some(&reference)),
            Err(EntityError::MissingTarget { .. })
        ));
    }

    #[test]
    fn attribute_wrapper_bumps_reference_only_on_change() {
        let schema = EntitySchema::open("product");
        let reference = Reference::initial(brand_key(), None, None);

        let set = ReferenceMutation::attribute(
            brand_key(),
            AttributeMutation::upsert(AttributeKey::global("priority"), 5.into()),
        );
        let with_attr = set.mutate_local(&schema, Some(&reference)).unwrap();
        assert_eq!(with_attr.version, 2);
        assert_eq!(
            with_attr
                .attributes
                .get(&AttributeKey::global("priority"))
                .unwrap()
                .value,
            serde_json::json!(5)
        );

        // identical attribute value leaves the reference untouched
        let again = set.mutate_local(&schema, Some(&with_attr)).unwrap();
        assert_eq!(again.version, 2);
    }

    #[test]
    fn mutations_against_missing_reference_fail() {
        let schema = EntitySchema::open("product");
        for mutation in [
            ReferenceMutation::remove(brand_key()),
            ReferenceMutation::set_group(brand_key(), GroupRef::new(None, 1)),
            ReferenceMutation::attribute(
                brand_key(),
                AttributeMutation::upsert(AttributeKey::global("x"), 1.into()),
            ),
        ] {
            assert!(matches!(
                mutation.mutate_local(&schema, None),
                Err(EntityError::MissingTarget { .. })
            ));
        }
    }

    #[test]
    fn undeclared_reference_requires_evolution() {
        let schema = EntitySchema::new("product");
        assert!(matches!(
            ReferenceMutation::insert(brand_key(), None, None).mutate_local(&schema, None),
            Err(EntityError::ReferenceNotInSchema { .. })
        ));
    }
}
