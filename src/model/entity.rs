use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{EntityError, Result};
use crate::model::{
    AssociatedData, AssociatedDataValue, Attributes, AttributeValue, DateRange, Locale, Price,
    PriceKey, Prices, Reference, ReferenceKey, References, validity_overlaps,
};

/// Immutable entity snapshot: the aggregate root of the client-side model.
///
/// Snapshots are never mutated in place; every accepted edit produces a new
/// `Entity` value at `version + 1`. Sub-containers are shared through `Arc`,
/// so a rebuild only reallocates the containers that actually changed and an
/// unchanged batch returns the base snapshot at the cost of a few reference
/// counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: String,
    /// Absent until the server assigns one (entities may be created without
    /// a caller-chosen primary key).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<i32>,
    pub version: u32,
    /// Primary key of the hierarchy parent, when placed in a hierarchy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<i32>,
    pub attributes: Arc<Attributes>,
    pub associated_data: Arc<AssociatedData>,
    pub prices: Arc<Prices>,
    pub references: Arc<References>,
    /// Union of the locales used by attribute and associated-data values;
    /// derived state, recomputed on every rebuild.
    pub locales: BTreeSet<Locale>,
    #[serde(default)]
    pub dropped: bool,
}

impl Entity {
    /// Empty version-1 snapshot; the state of a brand-new entity before any
    /// value was set.
    pub fn empty(entity_type: impl Into<String>, primary_key: Option<i32>) -> Self {
        Self {
            entity_type: entity_type.into(),
            primary_key,
            version: 1,
            parent: None,
            attributes: Arc::new(Attributes::default()),
            associated_data: Arc::new(AssociatedData::default()),
            prices: Arc::new(Prices::default()),
            references: Arc::new(References::default()),
            locales: BTreeSet::new(),
            dropped: false,
        }
    }

    pub fn parent(&self) -> Option<i32> {
        self.parent
    }

    /// Effective attribute value with locale fallback: a localized miss
    /// falls back to the global slot, a global lookup never yields a
    /// localized value.
    pub fn get_attribute(&self, name: &str, locale: Option<&Locale>) -> Option<&AttributeValue> {
        self.attributes.get_with_fallback(name, locale)
    }

    pub fn attribute_names(&self) -> BTreeSet<&str> {
        self.attributes.names()
    }

    pub fn attribute_values(&self) -> impl Iterator<Item = &AttributeValue> {
        self.attributes.iter()
    }

    /// Effective associated-data value, same fallback contract as attributes.
    pub fn get_associated_data(
        &self,
        name: &str,
        locale: Option<&Locale>,
    ) -> Option<&AssociatedDataValue> {
        self.associated_data.get_with_fallback(name, locale)
    }

    pub fn associated_data_names(&self) -> BTreeSet<&str> {
        self.associated_data.names()
    }

    pub fn get_price(&self, key: &PriceKey) -> Option<&Price> {
        self.prices.get(key)
    }

    pub fn prices(&self) -> impl Iterator<Item = &Price> {
        self.prices.iter()
    }

    /// Whether any live sellable price is valid somewhere inside the given
    /// interval. Fails with [`EntityError::PricesNotFetched`] when the
    /// snapshot was materialized without price data; that situation is
    /// distinct from "the entity genuinely has no prices".
    pub fn has_price_in_interval(&self, interval: &DateRange) -> Result<bool> {
        if !self.prices.fetched {
            return Err(EntityError::PricesNotFetched);
        }
        Ok(self
            .prices
            .iter()
            .filter(|p| p.sellable)
            .any(|p| validity_overlaps(p.validity.as_ref(), Some(interval))))
    }

    pub fn get_reference(&self, key: &ReferenceKey) -> Option<&Reference> {
        self.references.get(key)
    }

    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.references.iter()
    }

    /// Live references of one kind.
    pub fn references_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Reference> {
        self.references.named(name)
    }

    pub fn locales(&self) -> &BTreeSet<Locale> {
        &self.locales
    }

    pub fn exists(&self) -> bool {
        !self.dropped
    }
}
