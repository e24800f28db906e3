use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use itertools::{Either, Itertools};

use crate::error::{EntityError, Result};
use crate::model::{AttributeKey, AttributeSchemaScope, AttributeValue, Attributes, Locale};
use crate::mutation::AttributeMutation;

/// Accumulates attribute values for a container that does not exist yet.
/// Every `set` is validated immediately against the supplied scope; the
/// builder never holds a value the schema would reject.
#[derive(Debug, Default, Clone)]
pub struct InitialAttributesBuilder {
    values: BTreeMap<AttributeKey, serde_json::Value>,
}

impl InitialAttributesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(
        &mut self,
        scope: &impl AttributeSchemaScope,
        key: AttributeKey,
        value: serde_json::Value,
    ) -> Result<&mut Self> {
        scope.verify(&key, &value)?;
        self.values.insert(key, value);
        Ok(self)
    }

    /// Forgets a previously set value. Nothing existed before the builder,
    /// so there is no tombstone to leave behind.
    pub fn remove(&mut self, key: &AttributeKey) -> &mut Self {
        self.values.remove(key);
        self
    }

    pub fn get(&self, key: &AttributeKey) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Upsert mutations for every collected value, in key order.
    pub fn to_mutations(&self) -> Vec<AttributeMutation> {
        self.values
            .iter()
            .map(|(key, value)| AttributeMutation::upsert(key.clone(), value.clone()))
            .collect()
    }

    /// Materializes the container. Each entry gets its declared schema, or
    /// an implicit one synthesized from the value.
    pub fn build(&self, scope: &impl AttributeSchemaScope) -> Attributes {
        let mut values = BTreeMap::new();
        let mut schemas = BTreeMap::new();
        for (key, value) in &self.values {
            schemas
                .entry(key.name.clone())
                .or_insert_with(|| scope.schema_for(key, value));
            values.insert(key.clone(), AttributeValue::initial(key.clone(), value.clone()));
        }
        Attributes::new(values, schemas)
    }
}

/// Edits an existing attribute container without touching it: a read-only
/// base plus a pending mutation per touched key, last write per key winning.
#[derive(Debug, Clone)]
pub struct ExistingAttributesBuilder {
    base: Arc<Attributes>,
    pending: BTreeMap<AttributeKey, AttributeMutation>,
}

impl ExistingAttributesBuilder {
    pub fn new(base: Arc<Attributes>) -> Self {
        Self {
            base,
            pending: BTreeMap::new(),
        }
    }

    /// Effective record under the exact key: pending state applied over the
    /// base, tombstones invisible.
    pub fn get(&self, key: &AttributeKey) -> Option<AttributeValue> {
        match self.pending.get(key) {
            Some(mutation) => mutation
                .apply_unchecked(self.base.get_raw(key))
                .ok()
                .filter(|v| v.exists()),
            None => self.base.get(key).cloned(),
        }
    }

    /// Effective value with the locale fallback contract of the container.
    pub fn get_with_fallback(&self, name: &str, locale: Option<&Locale>) -> Option<AttributeValue> {
        if let Some(locale) = locale {
            let localized = AttributeKey::localized(name, locale.clone());
            if let Some(value) = self.get(&localized) {
                return Some(value);
            }
        }
        self.get(&AttributeKey::global(name))
    }

    /// Keys with an effective live value.
    pub fn keys(&self) -> BTreeSet<AttributeKey> {
        self.base
            .values
            .keys()
            .chain(self.pending.keys())
            .filter(|key| self.get(key).is_some())
            .cloned()
            .collect()
    }

    pub fn set(
        &mut self,
        scope: &impl AttributeSchemaScope,
        key: AttributeKey,
        value: serde_json::Value,
    ) -> Result<&mut Self> {
        scope.verify(&key, &value)?;
        self.pending
            .insert(key.clone(), AttributeMutation::upsert(key, value));
        Ok(self)
    }

    /// Schedules a removal. Removing a key whose only existence is a pending
    /// upsert cancels that upsert; removing a key that exists nowhere fails
    /// right away.
    pub fn remove(&mut self, key: &AttributeKey) -> Result<&mut Self> {
        match self.pending.get(key) {
            Some(AttributeMutation::Upsert(_)) => {
                if self.base.get(key).is_some() {
                    self.pending
                        .insert(key.clone(), AttributeMutation::remove(key.clone()));
                } else {
                    self.pending.remove(key);
                }
                Ok(self)
            }
            Some(AttributeMutation::Remove(_)) => Err(EntityError::MissingTarget {
                kind: "attribute",
                key: key.to_string(),
            }),
            None => {
                if self.base.get(key).is_some() {
                    self.pending
                        .insert(key.clone(), AttributeMutation::remove(key.clone()));
                    Ok(self)
                } else {
                    Err(EntityError::MissingTarget {
                        kind: "attribute",
                        key: key.to_string(),
                    })
                }
            }
        }
    }

    /// Records an externally supplied mutation under the same rules as the
    /// direct `set`/`remove` calls.
    pub fn mutate(
        &mut self,
        scope: &impl AttributeSchemaScope,
        mutation: AttributeMutation,
    ) -> Result<&mut Self> {
        match mutation {
            AttributeMutation::Upsert(m) => self.set(scope, m.key, m.value),
            AttributeMutation::Remove(m) => self.remove(&m.key),
        }
    }

    pub fn has_changes(&self) -> bool {
        self.pending
            .iter()
            .any(|(key, mutation)| self.is_real_change(key, mutation))
    }

    fn is_real_change(&self, key: &AttributeKey, mutation: &AttributeMutation) -> bool {
        let base_version = self.base.get_raw(key).map_or(0, |v| v.version);
        mutation
            .apply_unchecked(self.base.get_raw(key))
            .map(|v| v.version > base_version)
            .unwrap_or(false)
    }

    /// Minimal change-set: pending entries whose application would produce a
    /// new version. Mutations of keys present in the base come first, pure
    /// additions after, each group in key order.
    pub fn build_change_set(&self) -> Vec<AttributeMutation> {
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

    /// Materializes the edited container. When no pending entry changes
    /// anything, the base `Arc` is returned untouched.
    pub fn build(&self, scope: &impl AttributeSchemaScope) -> Arc<Attributes> {
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
            if !schemas.contains_key(&value.key.name) {
                schemas.insert(value.key.name.clone(), scope.schema_for(&value.key, &value.value));
            }
            values.insert(value.key.clone(), value);
        }
        Arc::new(Attributes::new(values, schemas))
    }
}
