use std::collections::BTreeMap;
use std::sync::Arc;

use itertools::{Either, Itertools};

use crate::error::{EntityError, Result};
use crate::model::{
    AssociatedData, AssociatedDataKey, AssociatedDataSchema, AssociatedDataValue, EntitySchema,
    Locale,
};
use crate::mutation::AssociatedDataMutation;

/// Accumulates associated-data values for a container that does not exist
/// yet. Mirrors [`crate::builder::InitialAttributesBuilder`]; the payloads
/// here may be arbitrarily nested.
#[derive(Debug, Default, Clone)]
pub struct InitialAssociatedDataBuilder {
    values: BTreeMap<AssociatedDataKey, serde_json::Value>,
}

impl InitialAssociatedDataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(
        &mut self,
        schema: &EntitySchema,
        key: AssociatedDataKey,
        value: serde_json::Value,
    ) -> Result<&mut Self> {
        schema.verify_associated_data(&key, &value)?;
        self.values.insert(key, value);
        Ok(self)
    }

    pub fn remove(&mut self, key: &AssociatedDataKey) -> &mut Self {
        self.values.remove(key);
        self
    }

    pub fn get(&self, key: &AssociatedDataKey) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_mutations(&self) -> Vec<AssociatedDataMutation> {
        self.values
            .iter()
            .map(|(key, value)| AssociatedDataMutation::upsert(key.clone(), value.clone()))
            .collect()
    }

    pub fn build(&self, schema: &EntitySchema) -> AssociatedData {
        let mut values = BTreeMap::new();
        let mut schemas = BTreeMap::new();
        for (key, value) in &self.values {
            schemas.entry(key.name.clone()).or_insert_with(|| {
                schema
                    .get_associated_data(&key.name)
                    .cloned()
                    .unwrap_or_else(|| {
                        AssociatedDataSchema::implicit(&key.name, key.is_localized(), value)
                    })
            });
            values.insert(
                key.clone(),
                AssociatedDataValue::initial(key.clone(), value.clone()),
            );
        }
        AssociatedData::new(values, schemas)
    }
}

/// Edits an existing associated-data container; same pending-map discipline
/// as the attribute builder.
#[derive(Debug, Clone)]
pub struct ExistingAssociatedDataBuilder {
    base: Arc<AssociatedData>,
    pending: BTreeMap<AssociatedDataKey, AssociatedDataMutation>,
}

impl ExistingAssociatedDataBuilder {
    pub fn new(base: Arc<AssociatedData>) -> Self {
        Self {
            base,
            pending: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &AssociatedDataKey) -> Option<AssociatedDataValue> {
        match self.pending.get(key) {
            Some(mutation) => mutation
                .apply_unchecked(self.base.get_raw(key))
                .ok()
                .filter(|v| v.exists()),
            None => self.base.get(key).cloned(),
        }
    }

    pub fn get_with_fallback(
        &self,
        name: &str,
        locale: Option<&Locale>,
    ) -> Option<AssociatedDataValue> {
        if let Some(locale) = locale {
            let localized = AssociatedDataKey::localized(name, locale.clone());
            if let Some(value) = self.get(&localized) {
                return Some(value);
            }
        }
        self.get(&AssociatedDataKey::global(name))
    }

    pub fn set(
        &mut self,
        schema: &EntitySchema,
        key: AssociatedDataKey,
        value: serde_json::Value,
    ) -> Result<&mut Self> {
        schema.verify_associated_data(&key, &value)?;
        self.pending
            .insert(key.clone(), AssociatedDataMutation::upsert(key, value));
        Ok(self)
    }

    /// Same removal rules as attributes: a pending-only addition is
    /// cancelled, a key that exists nowhere fails immediately.
    pub fn remove(&mut self, key: &AssociatedDataKey) -> Result<&mut Self> {
        match self.pending.get(key) {
            Some(AssociatedDataMutation::Upsert(_)) => {
                if self.base.get(key).is_some() {
                    self.pending
                        .insert(key.clone(), AssociatedDataMutation::remove(key.clone()));
                } else {
                    self.pending.remove(key);
                }
                Ok(self)
            }
            Some(AssociatedDataMutation::Remove(_)) => Err(EntityError::MissingTarget {
                kind: "associated data",
                key: key.to_string(),
            }),
            None => {
                if self.base.get(key).is_some() {
                    self.pending
                        .insert(key.clone(), AssociatedDataMutation::remove(key.clone()));
                    Ok(self)
                } else {
                    Err(EntityError::MissingTarget {
                        kind: "associated data",
                        key: key.to_string(),
                    })
                }
            }
        }
    }

    pub fn mutate(
        &mut self,
        schema: &EntitySchema,
        mutation: AssociatedDataMutation,
    ) -> Result<&mut Self> {
        match mutation {
            AssociatedDataMutation::Upsert(m) => self.set(schema, m.key, m.value),
            AssociatedDataMutation::Remove(m) => self.remove(&m.key),
        }
    }

    pub fn has_changes(&self) -> bool {
        self.pending
            .iter()
            .any(|(key, mutation)| self.is_real_change(key, mutation))
    }

    fn is_real_change(&self, key: &AssociatedDataKey, mutation: &AssociatedDataMutation) -> bool {
        let base_version = self.base.get_raw(key).map_or(0, |v| v.version);
        mutation
            .apply_unchecked(self.base.get_raw(key))
            .map(|v| v.version > base_version)
            .unwrap_or(false)
    }

    /// Minimal change-set, mutations of base keys before pure additions.
    pub fn build_change_set(&self) -> Vec<AssociatedDataMutation> {
        let (changed, added): (Vec<_>, Vec<_>) = self
            .pending
            .iter()
            .filter(|(key, mutation)| self.is_real_change(key, mutation))
            .partition_map(|(key, mutation)| {
                if self.base.get_raw(key).is_some() {
                    Either::Left(mutation.clone())
                } else {
                    Either::Right(mutation.clone())
                }
            });
        changed.into_iter().chain(added).collect()
    }

    pub fn build(&self, schema: &EntitySchema) -> Arc<AssociatedData> {
        let mut net = Vec::new();
        for (key, mutation) in &self.pending {
            if !self.is_real_change(key, mutation) {
                continue;
            }
            if let Ok(mutated) = mutation.apply_unchecked(self.base.get_raw(key)) {
                net.push(mutated);
            }
        }
        if net.is_empty() {
            return Arc::clone(&self.base);
        }
        let mut values = self.base.values.clone();
        let mut schemas = self.base.schemas.clone();
        for value in net {
            schemas.entry(value.key.name.clone()).or_insert_with(|| {
                schema
                    .get_associated_data(&value.key.name)
                    .cloned()
                    .unwrap_or_else(|| {
                        AssociatedDataSchema::implicit(
                            &value.key.name,
                            value.key.is_localized(),
                            &value.value,
                        )
                    })
            });
            values.insert(value.key.clone(), value);
        }
        Arc::new(AssociatedData::new(values, schemas))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(values: Vec<(AssociatedDataKey, serde_json::Value)>) -> Arc<AssociatedData> {
        let mut map = BTreeMap::new();
        for (key, value) in values {
            map.insert(key.clone(), AssociatedDataValue::initial(key, value));
        }
        Arc::new(AssociatedData::new(map, BTreeMap::new()))
    }

    #[test]
    fn structured_payload_round_trips_through_builder() {
        let schema = EntitySchema::open("product");
        let key = AssociatedDataKey::global("dimensions");
        let payload = serde_json::json!({"w": 10, "h": 20});

        let mut builder = InitialAssociatedDataBuilder::new();
        builder.set(&schema, key.clone(), payload.clone()).unwrap();
        let container = builder.build(&schema);
        assert_eq!(container.get(&key).unwrap().value, payload);
    }

    #[test]
    fn existing_builder_edits_and_cancels() {
        let schema = EntitySchema::open("product");
        let key = AssociatedDataKey::global("labels");
        let mut builder =
            ExistingAssociatedDataBuilder::new(base(vec![(key.clone(), serde_json::json!(["a"]))]));

        builder
            .set(&schema, key.clone(), serde_json::json!(["a", "b"]))
            .unwrap();
        assert_eq!(
            builder.get(&key).unwrap().value,
            serde_json::json!(["a", "b"])
        );

        let temp = AssociatedDataKey::global("temp");
        builder
            .set(&schema, temp.clone(), serde_json::json!(1))
            .unwrap();
        builder.remove(&temp).unwrap();

        let change_set = builder.build_change_set();
        assert_eq!(change_set.len(), 1);
        assert_eq!(change_set[0].key(), &key);
    }

    #[test]
    fn unchanged_build_shares_base() {
        let schema = EntitySchema::open("product");
        let key = AssociatedDataKey::global("labels");
        let shared = base(vec![(key.clone(), serde_json::json!(["a"]))]);
        let mut builder = ExistingAssociatedDataBuilder::new(Arc::clone(&shared));
        builder.set(&schema, key, serde_json::json!(["a"])).unwrap();

        assert!(Arc::ptr_eq(&builder.build(&schema), &shared));
    }

    #[test]
    fn remove_missing_fails() {
        let mut builder = ExistingAssociatedDataBuilder::new(base(vec![]));
        assert!(matches!(
            builder.remove(&AssociatedDataKey::global("ghost")),
            Err(EntityError::MissingTarget { .. })
        ));
    }
}
