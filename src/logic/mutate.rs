use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::logic::ambiguity::assert_price_unambiguous;
use crate::model::{
    AssociatedData, AssociatedDataKey, AssociatedDataValue, AttributeKey, AttributeSchemaScope,
    AttributeValue, Attributes, Entity, EntityAttributeScope, EntitySchema, Price, PriceKey,
    Prices, Reference, ReferenceKey, References,
};
use crate::mutation::{EntityUpsertMutation, LocalMutation, PriceMutation};

/// Applies a mixed batch of local mutations to an optional base snapshot and
/// returns the resulting snapshot.
///
/// The batch is folded per category with the shared no-op rule: a mutation's
/// result is kept only when its version exceeds the version it was computed
/// from. Only containers with at least one net change are rebuilt; untouched
/// ones are shared with the base through their `Arc`. When nothing changed at
/// all, the base entity is returned as-is (same version, same containers);
/// without a base an empty version-1 entity is returned instead.
///
/// A reference the batch itself creates stays at version 1 no matter how many
/// follow-up mutations in the same batch shape it, so replaying a creation
/// envelope yields the same snapshot a local build does.
pub fn mutate_entity(
    schema: &EntitySchema,
    base: Option<&Entity>,
    mutations: &[LocalMutation],
) -> Result<Entity> {
    mutate_entity_with_key(schema, base, mutations, None)
}

/// [`mutate_entity`] applied to a wire envelope; the envelope's primary key
/// seeds a created entity when there is no base snapshot.
pub fn apply_entity_upsert(
    schema: &EntitySchema,
    base: Option<&Entity>,
    envelope: &EntityUpsertMutation,
) -> Result<Entity> {
    mutate_entity_with_key(schema, base, &envelope.mutations, envelope.primary_key)
}

fn mutate_entity_with_key(
    schema: &EntitySchema,
    base: Option<&Entity>,
    mutations: &[LocalMutation],
    created_primary_key: Option<i32>,
) -> Result<Entity> {
    let scope = EntityAttributeScope::new(schema);

    let base_parent = base.and_then(|e| e.parent);
    let base_handling = base
        .map(|e| e.prices.inner_record_handling)
        .unwrap_or_default();

    let mut parent = base_parent;
    let mut handling = base_handling;
    let mut net_attributes: BTreeMap<AttributeKey, AttributeValue> = BTreeMap::new();
    let mut net_associated: BTreeMap<AssociatedDataKey, AssociatedDataValue> = BTreeMap::new();
    let mut net_prices: BTreeMap<PriceKey, Price> = BTreeMap::new();
    let mut net_references: BTreeMap<ReferenceKey, Reference> = BTreeMap::new();

    for mutation in mutations {
        match mutation {
            LocalMutation::Parent(m) => {
                parent = m.mutate_local(schema, parent)?;
            }
            LocalMutation::Attribute(m) => {
                let key = m.key();
                let prev = net_attributes
                    .get(key)
                    .or_else(|| base.and_then(|e| e.attributes.get_raw(key)));
                let prev_version = prev.map_or(0, |v| v.version);
                let mutated = m.mutate_local(&scope, prev)?;
                if mutated.version > prev_version {
                    net_attributes.insert(key.clone(), mutated);
                }
            }
            LocalMutation::AssociatedData(m) => {
                let key = m.key();
                let prev = net_associated
                    .get(key)
                    .or_else(|| base.and_then(|e| e.associated_data.get_raw(key)));
                let prev_version = prev.map_or(0, |v| v.version);
                let mutated = m.mutate_local(schema, prev)?;
                if mutated.version > prev_version {
                    net_associated.insert(key.clone(), mutated);
                }
            }
            LocalMutation::InnerRecordHandling(m) => {
                handling = m.mutate_local(schema, handling)?;
            }
            LocalMutation::Price(m) => {
                if let PriceMutation::Upsert(upsert) = m {
                    let live: Vec<&Price> = net_prices
                        .values()
                        .filter(|p| p.exists())
                        .chain(
                            base.iter()
                                .flat_map(|e| e.prices.values.values())
                                .filter(|p| p.exists() && !net_prices.contains_key(&p.key)),
                        )
                        .collect();
                    assert_price_unambiguous(live, upsert)?;
                }
                let key = m.key();
                let prev = net_prices
                    .get(key)
                    .or_else(|| base.and_then(|e| e.prices.get_raw(key)));
                let prev_version = prev.map_or(0, |v| v.version);
                let mutated = m.mutate_local(schema, prev)?;
                if mutated.version > prev_version {
                    net_prices.insert(key.clone(), mutated);
                }
            }
            LocalMutation::Reference(m) => {
                let key = m.key();
                let base_prev = base.and_then(|e| e.references.get_raw(key));
                let prev = net_references.get(key).or(base_prev);
                let prev_version = prev.map_or(0, |v| v.version);
                let mut mutated = m.mutate_local(schema, prev)?;
                if mutated.version > prev_version {
                    // created within this batch: versions do not accumulate
                    if base_prev.is_none() {
                        mutated.version = 1;
                    }
                    net_references.insert(key.clone(), mutated);
                }
            }
        }
    }

    let parent_changed = parent != base_parent;
    let handling_changed = handling != base_handling;
    let changed = parent_changed
        || handling_changed
        || !net_attributes.is_empty()
        || !net_associated.is_empty()
        || !net_prices.is_empty()
        || !net_references.is_empty();

    if !changed {
        log::debug!(
            "mutation batch of {} produced no change, keeping base snapshot",
            mutations.len()
        );
        return Ok(match base {
            Some(entity) => entity.clone(),
            None => Entity::empty(schema.name.clone(), created_primary_key),
        });
    }

    let attributes = if net_attributes.is_empty() {
        base.map(|e| Arc::clone(&e.attributes))
            .unwrap_or_else(|| Arc::new(Attributes::empty(schema.attributes.clone())))
    } else {
        let mut values = base.map(|e| e.attributes.values.clone()).unwrap_or_default();
        let mut schemas = base
            .map(|e| e.attributes.schemas.clone())
            .unwrap_or_else(|| schema.attributes.clone());
        for (key, value) in net_attributes {
            if !schemas.contains_key(&key.name) {
                schemas.insert(key.name.clone(), scope.schema_for(&key, &value.value));
            }
            values.insert(key, value);
        }
        Arc::new(Attributes::new(values, schemas))
    };

    let associated_data = if net_associated.is_empty() {
        base.map(|e| Arc::clone(&e.associated_data))
            .unwrap_or_else(|| Arc::new(AssociatedData::empty(schema.associated_data.clone())))
    } else {
        let mut values = base
            .map(|e| e.associated_data.values.clone())
            .unwrap_or_default();
        let mut schemas = base
            .map(|e| e.associated_data.schemas.clone())
            .unwrap_or_else(|| schema.associated_data.clone());
        for (key, value) in net_associated {
            schemas.entry(key.name.clone()).or_insert_with(|| {
                crate::model::AssociatedDataSchema::implicit(
                    &key.name,
                    key.locale.is_some(),
                    &value.value,
                )
            });
            values.insert(key, value);
        }
        Arc::new(AssociatedData::new(values, schemas))
    };

    let prices = if net_prices.is_empty() && !handling_changed {
        base.map(|e| Arc::clone(&e.prices))
            .unwrap_or_else(|| Arc::new(Prices::default()))
    } else {
        let mut values = base.map(|e| e.prices.values.clone()).unwrap_or_default();
        for (key, value) in net_prices {
            values.insert(key, value);
        }
        let version = base.map_or(1, |e| e.prices.version + 1);
        Arc::new(Prices::new(values, version, handling))
    };

    let references = if net_references.is_empty() {
        base.map(|e| Arc::clone(&e.references))
            .unwrap_or_else(|| Arc::new(References::default()))
    } else {
        let mut values = base.map(|e| e.references.values.clone()).unwrap_or_default();
        for (key, value) in net_references {
            values.insert(key, value);
        }
        Arc::new(References::new(values))
    };

    let locales = attributes
        .locales()
        .into_iter()
        .chain(associated_data.locales())
        .collect();

    let entity = Entity {
        entity_type: base.map_or_else(|| schema.name.clone(), |e| e.entity_type.clone()),
        primary_key: base.map_or(created_primary_key, |e| e.primary_key),
        version: base.map_or(1, |e| e.version + 1),
        parent,
        attributes,
        associated_data,
        prices,
        references,
        locales,
        dropped: false,
    };
    log::debug!(
        "mutation batch of {} rebuilt entity {:?} at version {}",
        mutations.len(),
        entity.primary_key,
        entity.version
    );
    Ok(entity)
}
