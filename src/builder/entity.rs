use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::builder::{
    ExistingAssociatedDataBuilder, ExistingAttributesBuilder, ExistingPricesBuilder,
    ExistingReferenceBuilder, InitialAssociatedDataBuilder, InitialAttributesBuilder,
    InitialPricesBuilder, InitialReferenceBuilder,
};
use crate::error::{EntityError, Result};
use crate::logic::mutate::mutate_entity;
use crate::model::{
    AssociatedDataKey, AssociatedDataValue, AttributeKey, AttributeValue, Cardinality, Entity,
    EntityAttributeScope, EntitySchema, GroupRef, Locale, Price, PriceInnerRecordHandling,
    PriceKey, Reference, ReferenceKey, References,
};
use crate::mutation::{
    EntityExistence, EntityUpsertMutation, LocalMutation, ParentMutation, ReferenceMutation,
    SetPriceInnerRecordHandlingMutation, UpsertPriceMutation,
};

/// Assembles a brand-new entity. Every setter validates against the schema
/// the moment it is called; the builder never holds an illegal value.
///
/// `to_mutation` yields the creation envelope for the external session
/// layer, `to_instance` a local version-1 snapshot of the same state.
#[derive(Debug, Clone)]
pub struct InitialEntityBuilder {
    entity_type: String,
    primary_key: Option<i32>,
    parent: Option<i32>,
    attributes: InitialAttributesBuilder,
    associated_data: InitialAssociatedDataBuilder,
    prices: InitialPricesBuilder,
    references: BTreeMap<ReferenceKey, InitialReferenceBuilder>,
}

impl InitialEntityBuilder {
    pub fn new(schema: &EntitySchema, primary_key: Option<i32>) -> Self {
        Self {
            entity_type: schema.name.clone(),
            primary_key,
            parent: None,
            attributes: InitialAttributesBuilder::new(),
            associated_data: InitialAssociatedDataBuilder::new(),
            prices: InitialPricesBuilder::new(),
            references: BTreeMap::new(),
        }
    }

    pub fn set_parent(&mut self, schema: &EntitySchema, parent: i32) -> Result<&mut Self> {
        schema.verify_hierarchy()?;
        self.parent = Some(parent);
        Ok(self)
    }

    pub fn remove_parent(&mut self) -> &mut Self {
        self.parent = None;
        self
    }

    pub fn set_attribute(
        &mut self,
        schema: &EntitySchema,
        key: AttributeKey,
        value: serde_json::Value,
    ) -> Result<&mut Self> {
        self.attributes
            .set(&EntityAttributeScope::new(schema), key, value)?;
        Ok(self)
    }

    pub fn remove_attribute(&mut self, key: &AttributeKey) -> &mut Self {
        self.attributes.remove(key);
        self
    }

    pub fn set_associated_data(
        &mut self,
        schema: &EntitySchema,
        key: AssociatedDataKey,
        value: serde_json::Value,
    ) -> Result<&mut Self> {
        self.associated_data.set(schema, key, value)?;
        Ok(self)
    }

    pub fn remove_associated_data(&mut self, key: &AssociatedDataKey) -> &mut Self {
        self.associated_data.remove(key);
        self
    }

    pub fn set_price(&mut self, schema: &EntitySchema, price: UpsertPriceMutation) -> Result<&mut Self> {
        self.prices.set(schema, price)?;
        Ok(self)
    }

    pub fn remove_price(&mut self, key: &PriceKey) -> &mut Self {
        self.prices.remove(key);
        self
    }

    pub fn set_price_inner_record_handling(
        &mut self,
        schema: &EntitySchema,
        handling: PriceInnerRecordHandling,
    ) -> Result<&mut Self> {
        self.prices.set_inner_record_handling(schema, handling)?;
        Ok(self)
    }

    /// Adds a reference and hands out its builder for group/attribute setup.
    pub fn insert_reference(
        &mut self,
        schema: &EntitySchema,
        key: ReferenceKey,
        referenced_entity_type: Option<String>,
        cardinality: Option<Cardinality>,
    ) -> Result<&mut InitialReferenceBuilder> {
        let builder =
            InitialReferenceBuilder::new(schema, key.clone(), referenced_entity_type, cardinality)?;
        Ok(match self.references.entry(key) {
            Entry::Occupied(mut slot) => {
                slot.insert(builder);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(builder),
        })
    }

    pub fn reference_mut(&mut self, key: &ReferenceKey) -> Option<&mut InitialReferenceBuilder> {
        self.references.get_mut(key)
    }

    pub fn remove_reference(&mut self, key: &ReferenceKey) -> &mut Self {
        self.references.remove(key);
        self
    }

    /// Creation envelope: everything collected so far as an ordered mutation
    /// list under a `MustNotExist` expectation.
    pub fn to_mutation(&self) -> EntityUpsertMutation {
        let mut mutations = Vec::new();
        if let Some(parent) = self.parent {
            mutations.push(LocalMutation::Parent(ParentMutation::set(parent)));
        }
        mutations.extend(
            self.attributes
                .to_mutations()
                .into_iter()
                .map(LocalMutation::Attribute),
        );
        mutations.extend(
            self.associated_data
                .to_mutations()
                .into_iter()
                .map(LocalMutation::AssociatedData),
        );
        if self.prices.inner_record_handling() != PriceInnerRecordHandling::None {
            mutations.push(LocalMutation::InnerRecordHandling(
                SetPriceInnerRecordHandlingMutation::new(self.prices.inner_record_handling()),
            ));
        }
        mutations.extend(
            self.prices
                .to_mutations()
                .into_iter()
                .map(LocalMutation::Price),
        );
        for builder in self.references.values() {
            mutations.extend(
                builder
                    .to_mutations()
                    .into_iter()
                    .map(LocalMutation::Reference),
            );
        }
        EntityUpsertMutation::new(
            self.entity_type.clone(),
            self.primary_key,
            EntityExistence::MustNotExist,
            mutations,
        )
    }

    /// Local version-1 snapshot of the collected state, without a round trip
    /// through the mutation machinery.
    pub fn to_instance(&self, schema: &EntitySchema) -> Result<Entity> {
        let scope = EntityAttributeScope::new(schema);
        let mut attributes = self.attributes.build(&scope);
        for (name, declared) in &schema.attributes {
            attributes
                .schemas
                .entry(name.clone())
                .or_insert_with(|| declared.clone());
        }
        let mut associated_data = self.associated_data.build(schema);
        for (name, declared) in &schema.associated_data {
            associated_data
                .schemas
                .entry(name.clone())
                .or_insert_with(|| declared.clone());
        }
        let mut references = BTreeMap::new();
        for (key, builder) in &self.references {
            references.insert(key.clone(), builder.build(schema)?);
        }
        let locales = attributes
            .locales()
            .into_iter()
            .chain(associated_data.locales())
            .collect();
        Ok(Entity {
            entity_type: self.entity_type.clone(),
            primary_key: self.primary_key,
            version: 1,
            parent: self.parent,
            attributes: Arc::new(attributes),
            associated_data: Arc::new(associated_data),
            prices: Arc::new(self.prices.build()),
            references: Arc::new(References::new(references)),
            locales,
            dropped: false,
        })
    }
}

/// Pending state of one reference on an existing-entity builder.
#[derive(Debug, Clone)]
enum PendingReference {
    Inserted(InitialReferenceBuilder),
    Edited(ExistingReferenceBuilder),
    Removed,
}

/// Edits an existing entity snapshot without touching it. Reads see the
/// pending edits applied over the base; `build_change_set` diffs the pending
/// state against the base into the minimal ordered mutation list.
#[derive(Debug, Clone)]
pub struct ExistingEntityBuilder {
    base: Entity,
    /// `Some(None)` is a pending removal from the hierarchy.
    parent: Option<Option<i32>>,
    attributes: ExistingAttributesBuilder,
    associated_data: ExistingAssociatedDataBuilder,
    prices: ExistingPricesBuilder,
    references: BTreeMap<ReferenceKey, PendingReference>,
}

impl ExistingEntityBuilder {
    pub fn new(base: Entity) -> Self {
        let attributes = ExistingAttributesBuilder::new(Arc::clone(&base.attributes));
        let associated_data = ExistingAssociatedDataBuilder::new(Arc::clone(&base.associated_data));
        let prices = ExistingPricesBuilder::new(Arc::clone(&base.prices));
        Self {
            base,
            parent: None,
            attributes,
            associated_data,
            prices,
            references: BTreeMap::new(),
        }
    }

    pub fn base(&self) -> &Entity {
        &self.base
    }

    pub fn parent(&self) -> Option<i32> {
        match self.parent {
            Some(pending) => pending,
            None => self.base.parent,
        }
    }

    pub fn set_parent(&mut self, schema: &EntitySchema, parent: i32) -> Result<&mut Self> {
        schema.verify_hierarchy()?;
        self.parent = Some(Some(parent));
        Ok(self)
    }

    pub fn remove_parent(&mut self, schema: &EntitySchema) -> Result<&mut Self> {
        schema.verify_hierarchy()?;
        if self.parent().is_none() {
            return Err(EntityError::MissingTarget {
                kind: "parent",
                key: "hierarchy placement".to_string(),
            });
        }
        self.parent = Some(None);
        Ok(self)
    }

    pub fn get_attribute(&self, name: &str, locale: Option<&Locale>) -> Option<AttributeValue> {
        self.attributes.get_with_fallback(name, locale)
    }

    pub fn set_attribute(
        &mut self,
        schema: &EntitySchema,
        key: AttributeKey,
        value: serde_json::Value,
    ) -> Result<&mut Self> {
        self.attributes
            .set(&EntityAttributeScope::new(schema), key, value)?;
        Ok(self)
    }

    pub fn remove_attribute(&mut self, key: &AttributeKey) -> Result<&mut Self> {
        self.attributes.remove(key)?;
        Ok(self)
    }

    pub fn get_associated_data(
        &self,
        name: &str,
        locale: Option<&Locale>,
    ) -> Option<AssociatedDataValue> {
        self.associated_data.get_with_fallback(name, locale)
    }

    pub fn set_associated_data(
        &mut self,
        schema: &EntitySchema,
        key: AssociatedDataKey,
        value: serde_json::Value,
    ) -> Result<&mut Self> {
        self.associated_data.set(schema, key, value)?;
        Ok(self)
    }

    pub fn remove_associated_data(&mut self, key: &AssociatedDataKey) -> Result<&mut Self> {
        self.associated_data.remove(key)?;
        Ok(self)
    }

    pub fn get_price(&self, key: &PriceKey) -> Option<Price> {
        self.prices.get(key)
    }

    pub fn set_price(
        &mut self,
        schema: &EntitySchema,
        price: UpsertPriceMutation,
    ) -> Result<&mut Self> {
        self.prices.set(schema, price)?;
        Ok(self)
    }

    pub fn remove_price(&mut self, schema: &EntitySchema, key: &PriceKey) -> Result<&mut Self> {
        self.prices.remove(schema, key)?;
        Ok(self)
    }

    pub fn set_price_inner_record_handling(
        &mut self,
        schema: &EntitySchema,
        handling: PriceInnerRecordHandling,
    ) -> Result<&mut Self> {
        self.prices.set_inner_record_handling(schema, handling)?;
        Ok(self)
    }

    /// Effective reference under the key, pending state applied.
    pub fn get_reference(&self, schema: &EntitySchema, key: &ReferenceKey) -> Option<Reference> {
        match self.references.get(key) {
            Some(PendingReference::Inserted(builder)) => builder.build(schema).ok(),
            Some(PendingReference::Edited(builder)) => builder.build(schema).ok(),
            Some(PendingReference::Removed) => None,
            None => self.base.references.get(key).cloned(),
        }
    }

    /// Schedules insertion of a new reference, replacing any pending state
    /// under the same key. A live base reference under the key is replaced
    /// wholesale: its group and attributes do not carry over, and the
    /// change-set removes it before the insert. Group and attributes are
    /// added afterwards through the `set_reference_*` calls.
    pub fn insert_reference(
        &mut self,
        schema: &EntitySchema,
        key: ReferenceKey,
        referenced_entity_type: Option<String>,
        cardinality: Option<Cardinality>,
    ) -> Result<&mut Self> {
        let builder =
            InitialReferenceBuilder::new(schema, key.clone(), referenced_entity_type, cardinality)?;
        self.references
            .insert(key, PendingReference::Inserted(builder));
        Ok(self)
    }

    /// Schedules a removal. A pending insert of a reference the base never
    /// had is cancelled; removing a reference that exists nowhere fails.
    pub fn remove_reference(&mut self, key: &ReferenceKey) -> Result<&mut Self> {
        match self.references.get(key) {
            Some(PendingReference::Inserted(_)) => {
                if self.base.references.get(key).is_some() {
                    self.references.insert(key.clone(), PendingReference::Removed);
                } else {
                    self.references.remove(key);
                }
            }
            Some(PendingReference::Removed) => {
                return Err(EntityError::MissingTarget {
                    kind: "reference",
                    key: key.to_string(),
                })
            }
            Some(PendingReference::Edited(_)) | None => {
                if self.base.references.get(key).is_some() {
                    self.references.insert(key.clone(), PendingReference::Removed);
                } else {
                    return Err(EntityError::MissingTarget {
                        kind: "reference",
                        key: key.to_string(),
                    });
                }
            }
        }
        Ok(self)
    }

    /// Pending slot for an edit, opening one over the base reference when
    /// this key was not touched yet.
    fn reference_slot(&mut self, key: &ReferenceKey) -> Result<&mut PendingReference> {
        if let Entry::Vacant(slot) = self.references.entry(key.clone()) {
            let base = self
                .base
                .references
                .get(key)
                .cloned()
                .ok_or_else(|| EntityError::MissingTarget {
                    kind: "reference",
                    key: key.to_string(),
                })?;
            slot.insert(PendingReference::Edited(ExistingReferenceBuilder::new(base)));
        }
        match self.references.get_mut(key) {
            Some(PendingReference::Removed) | None => Err(EntityError::MissingTarget {
                kind: "reference",
                key: key.to_string(),
            }),
            Some(slot) => Ok(slot),
        }
    }

    pub fn set_reference_group(
        &mut self,
        key: &ReferenceKey,
        group: GroupRef,
    ) -> Result<&mut Self> {
        match self.reference_slot(key)? {
            PendingReference::Inserted(builder) => {
                builder.set_group(group);
            }
            PendingReference::Edited(builder) => {
                builder.set_group(group);
            }
            PendingReference::Removed => {}
        }
        Ok(self)
    }

    pub fn remove_reference_group(&mut self, key: &ReferenceKey) -> Result<&mut Self> {
        match self.reference_slot(key)? {
            PendingReference::Inserted(builder) => {
                builder.remove_group();
            }
            PendingReference::Edited(builder) => {
                builder.remove_group()?;
            }
            PendingReference::Removed => {}
        }
        Ok(self)
    }

    pub fn set_reference_attribute(
        &mut self,
        schema: &EntitySchema,
        key: &ReferenceKey,
        attribute: AttributeKey,
        value: serde_json::Value,
    ) -> Result<&mut Self> {
        match self.reference_slot(key)? {
            PendingReference::Inserted(builder) => {
                builder.set_attribute(schema, attribute, value)?;
            }
            PendingReference::Edited(builder) => {
                builder.set_attribute(schema, attribute, value)?;
            }
            PendingReference::Removed => {}
        }
        Ok(self)
    }

    pub fn remove_reference_attribute(
        &mut self,
        key: &ReferenceKey,
        attribute: &AttributeKey,
    ) -> Result<&mut Self> {
        match self.reference_slot(key)? {
            PendingReference::Inserted(builder) => {
                builder.remove_attribute(attribute);
            }
            PendingReference::Edited(builder) => {
                builder.remove_attribute(attribute)?;
            }
            PendingReference::Removed => {}
        }
        Ok(self)
    }

    fn parent_change(&self) -> Option<ParentMutation> {
        let pending = self.parent?;
        if pending == self.base.parent {
            return None;
        }
        Some(match pending {
            Some(parent) => ParentMutation::set(parent),
            None => ParentMutation::remove(),
        })
    }

    pub fn has_changes(&self) -> bool {
        !self.build_change_set().is_empty()
    }

    /// The minimal change-set in canonical order: parent, attributes,
    /// associated data, inner-record-handling, prices, references. Pending
    /// edits that turned out to change nothing are absent; replaying the
    /// result against the base snapshot reproduces the edited state.
    pub fn build_change_set(&self) -> Vec<LocalMutation> {
        let mut mutations = Vec::new();
        if let Some(change) = self.parent_change() {
            mutations.push(LocalMutation::Parent(change));
        }
        mutations.extend(
            self.attributes
                .build_change_set()
                .into_iter()
                .map(LocalMutation::Attribute),
        );
        mutations.extend(
            self.associated_data
                .build_change_set()
                .into_iter()
                .map(LocalMutation::AssociatedData),
        );
        if let Some(handling) = self.prices.handling_change() {
            mutations.push(LocalMutation::InnerRecordHandling(handling));
        }
        mutations.extend(
            self.prices
                .build_change_set()
                .into_iter()
                .map(LocalMutation::Price),
        );
        for (key, pending) in &self.references {
            match pending {
                PendingReference::Inserted(builder) => {
                    // a live base reference is replaced, not merged into
                    if self.base.references.get(key).is_some() {
                        mutations.push(LocalMutation::Reference(ReferenceMutation::remove(
                            key.clone(),
                        )));
                    }
                    mutations.extend(
                        builder
                            .to_mutations()
                            .into_iter()
                            .map(LocalMutation::Reference),
                    );
                }
                PendingReference::Edited(builder) => mutations.extend(
                    builder
                        .build_change_set()
                        .into_iter()
                        .map(LocalMutation::Reference),
                ),
                PendingReference::Removed => mutations.push(LocalMutation::Reference(
                    ReferenceMutation::remove(key.clone()),
                )),
            }
        }
        mutations
    }

    /// Envelope for the external session layer; `None` when nothing changed,
    /// so callers never transmit empty envelopes.
    pub fn to_mutation(&self) -> Option<EntityUpsertMutation> {
        let mutations = self.build_change_set();
        if mutations.is_empty() {
            return None;
        }
        Some(EntityUpsertMutation::new(
            self.base.entity_type.clone(),
            self.base.primary_key,
            EntityExistence::MustExist,
            mutations,
        ))
    }

    /// Edited snapshot: the change-set applied over the base through the
    /// same machinery a replay would use. An empty change-set returns the
    /// base at its original version with all containers shared.
    pub fn to_instance(&self, schema: &EntitySchema) -> Result<Entity> {
        mutate_entity(schema, Some(&self.base), &self.build_change_set())
    }
}
