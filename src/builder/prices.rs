use std::collections::BTreeMap;
use std::sync::Arc;

use itertools::{Either, Itertools};

use crate::error::{EntityError, Result};
use crate::logic::ambiguity::assert_price_unambiguous;
use crate::model::{EntitySchema, Price, PriceInnerRecordHandling, PriceKey, Prices};
use crate::mutation::{PriceMutation, SetPriceInnerRecordHandlingMutation, UpsertPriceMutation};

/// Accumulates prices for a container that does not exist yet. The ambiguity
/// gate runs against the prices collected so far, so an inconsistent set can
/// never be assembled.
#[derive(Debug, Default, Clone)]
pub struct InitialPricesBuilder {
    values: BTreeMap<PriceKey, UpsertPriceMutation>,
    inner_record_handling: PriceInnerRecordHandling,
}

impl InitialPricesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, schema: &EntitySchema, price: UpsertPriceMutation) -> Result<&mut Self> {
        schema.verify_prices()?;
        let collected: Vec<Price> = self
            .values
            .values()
            .filter(|p| p.key != price.key)
            .map(|p| p.to_price(1))
            .collect();
        assert_price_unambiguous(&collected, &price)?;
        self.values.insert(price.key.clone(), price);
        Ok(self)
    }

    pub fn remove(&mut self, key: &PriceKey) -> &mut Self {
        self.values.remove(key);
        self
    }

    pub fn get(&self, key: &PriceKey) -> Option<&UpsertPriceMutation> {
        self.values.get(key)
    }

    pub fn set_inner_record_handling(
        &mut self,
        schema: &EntitySchema,
        handling: PriceInnerRecordHandling,
    ) -> Result<&mut Self> {
        schema.verify_prices()?;
        self.inner_record_handling = handling;
        Ok(self)
    }

    pub fn inner_record_handling(&self) -> PriceInnerRecordHandling {
        self.inner_record_handling
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.inner_record_handling == PriceInnerRecordHandling::None
    }

    pub fn to_mutations(&self) -> Vec<PriceMutation> {
        self.values
            .values()
            .map(|price| PriceMutation::Upsert(price.clone()))
            .collect()
    }

    pub fn build(&self) -> Prices {
        let values = self
            .values
            .values()
            .map(|price| (price.key.clone(), price.to_price(1)))
            .collect();
        Prices::new(values, 1, self.inner_record_handling)
    }
}

/// Edits an existing price container. Every entry call checks that the base
/// snapshot was materialized with price data; editing prices that were never
/// fetched would silently re-create them.
#[derive(Debug, Clone)]
pub struct ExistingPricesBuilder {
    base: Arc<Prices>,
    pending: BTreeMap<PriceKey, PriceMutation>,
    pending_handling: Option<PriceInnerRecordHandling>,
}

impl ExistingPricesBuilder {
    pub fn new(base: Arc<Prices>) -> Self {
        Self {
            base,
            pending: BTreeMap::new(),
            pending_handling: None,
        }
    }

    fn verify_fetched(&self) -> Result<()> {
        if self.base.fetched {
            Ok(())
        } else {
            Err(EntityError::PricesNotFetched)
        }
    }

    /// Effective live price under the key, pending state applied.
    pub fn get(&self, key: &PriceKey) -> Option<Price> {
        match self.pending.get(key) {
            Some(mutation) => mutation
                .apply_unchecked(self.base.get_raw(key))
                .ok()
                .filter(|p| p.exists()),
            None => self.base.get(key).cloned(),
        }
    }

    /// All effective live prices.
    pub fn prices(&self) -> Vec<Price> {
        self.base
            .values
            .keys()
            .chain(self.pending.keys())
            .unique()
            .filter_map(|key| self.get(key))
            .collect()
    }

    pub fn inner_record_handling(&self) -> PriceInnerRecordHandling {
        self.pending_handling
            .unwrap_or(self.base.inner_record_handling)
    }

    pub fn set(&mut self, schema: &EntitySchema, price: UpsertPriceMutation) -> Result<&mut Self> {
        schema.verify_prices()?;
        self.verify_fetched()?;
        let effective: Vec<Price> = self
            .prices()
            .into_iter()
            .filter(|p| p.key != price.key)
            .collect();
        assert_price_unambiguous(&effective, &price)?;
        self.pending
            .insert(price.key.clone(), PriceMutation::Upsert(price));
        Ok(self)
    }

    /// Same removal rules as the other containers: a pending-only addition
    /// is cancelled, a price that exists nowhere fails immediately.
    pub fn remove(&mut self, schema: &EntitySchema, key: &PriceKey) -> Result<&mut Self> {
        schema.verify_prices()?;
        self.verify_fetched()?;
        match self.pending.get(key) {
            Some(PriceMutation::Upsert(_)) => {
                if self.base.get(key).is_some() {
                    self.pending.insert(key.clone(), PriceMutation::remove(key.clone()));
                } else {
                    self.pending.remove(key);
                }
                Ok(self)
            }
            Some(PriceMutation::Remove(_)) => Err(EntityError::MissingTarget {
                kind: "price",
                key: key.to_string(),
            }),
            None => {
                if self.base.get(key).is_some() {
                    self.pending.insert(key.clone(), PriceMutation::remove(key.clone()));
                    Ok(self)
                } else {
                    Err(EntityError::MissingTarget {
                        kind: "price",
                        key: key.to_string(),
                    })
                }
            }
        }
    }

    pub fn set_inner_record_handling(
        &mut self,
        schema: &EntitySchema,
        handling: PriceInnerRecordHandling,
    ) -> Result<&mut Self> {
        schema.verify_prices()?;
        self.verify_fetched()?;
        self.pending_handling = Some(handling);
        Ok(self)
    }

    pub fn mutate(&mut self, schema: &EntitySchema, mutation: PriceMutation) -> Result<&mut Self> {
        match mutation {
            PriceMutation::Upsert(m) => self.set(schema, m),
            PriceMutation::Remove(m) => self.remove(schema, &m.key),
        }
    }

    fn is_real_change(&self, key: &PriceKey, mutation: &PriceMutation) -> bool {
        let base_version = self.base.get_raw(key).map_or(0, |p| p.version);
        mutation
            .apply_unchecked(self.base.get_raw(key))
            .map(|p| p.version > base_version)
            .unwrap_or(false)
    }

    /// Handling change to transmit, `None` when the mode is unchanged.
    pub fn handling_change(&self) -> Option<SetPriceInnerRecordHandlingMutation> {
        self.pending_handling
            .filter(|handling| *handling != self.base.inner_record_handling)
            .map(SetPriceInnerRecordHandlingMutation::new)
    }

    pub fn has_changes(&self) -> bool {
        self.handling_change().is_some()
            || self
                .pending
                .iter()
                .any(|(key, mutation)| self.is_real_change(key, mutation))
    }

    /// Minimal price change-set, mutations of base keys before additions.
    /// The handling change travels separately via [`Self::handling_change`].
    pub fn build_change_set(&self) -> Vec<PriceMutation> {
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

    pub fn build(&self) -> Arc<Prices> {
        let mut net = Vec::new();
        for (key, mutation) in &self.pending {
            if !self.is_real_change(key, mutation) {
                continue;
            }
            if let Ok(mutated) = mutation.apply_unchecked(self.base.get_raw(key)) {
                net.push(mutated);
            }
        }
        let handling_changed = self.handling_change().is_some();
        if net.is_empty() && !handling_changed {
            return Arc::clone(&self.base);
        }
        let mut values = self.base.values.clone();
        for price in net {
            values.insert(price.key.clone(), price);
        }
        Arc::new(Prices::new(
            values,
            self.base.version + 1,
            self.inner_record_handling(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DateRange;
    use chrono::{TimeZone, Utc};

    fn upsert(id: i32, amount: f64) -> UpsertPriceMutation {
        UpsertPriceMutation {
            key: PriceKey::new(id, "basic", "USD"),
            inner_record_id: None,
            price_without_tax: amount,
            tax_rate: 0.0,
            price_with_tax: amount,
            validity: None,
            sellable: true,
        }
    }

    fn at(month: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, month, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn initial_builder_rejects_ambiguous_pair() {
        let schema = EntitySchema::open("product");
        let mut builder = InitialPricesBuilder::new();
        builder.set(&schema, upsert(1, 10.0)).unwrap();

        let err = builder.set(&schema, upsert(2, 12.0)).unwrap_err();
        assert!(matches!(err, EntityError::AmbiguousPrice { .. }));

        let mut scoped = upsert(2, 12.0);
        scoped.validity = Some(DateRange::between(at(1), at(3)));
        let mut other = upsert(3, 14.0);
        other.validity = Some(DateRange::between(at(4), at(6)));

        let mut builder = InitialPricesBuilder::new();
        builder.set(&schema, scoped).unwrap();
        builder.set(&schema, other).unwrap();
        assert_eq!(builder.build().iter().count(), 2);
    }

    #[test]
    fn replacing_own_key_is_not_ambiguous() {
        let schema = EntitySchema::open("product");
        let mut builder = InitialPricesBuilder::new();
        builder.set(&schema, upsert(1, 10.0)).unwrap();
        builder.set(&schema, upsert(1, 11.0)).unwrap();
        assert_eq!(builder.build().iter().count(), 1);
    }

    #[test]
    fn existing_builder_noop_returns_base_arc() {
        let schema = EntitySchema::open("product");
        let mut initial = InitialPricesBuilder::new();
        initial.set(&schema, upsert(1, 10.0)).unwrap();
        let base = Arc::new(initial.build());

        let mut builder = ExistingPricesBuilder::new(Arc::clone(&base));
        builder.set(&schema, upsert(1, 10.0)).unwrap();
        assert!(!builder.has_changes());
        assert!(builder.build_change_set().is_empty());
        assert!(Arc::ptr_eq(&builder.build(), &base));
    }

    #[test]
    fn price_change_bumps_container_version() {
        let schema = EntitySchema::open("product");
        let mut initial = InitialPricesBuilder::new();
        initial.set(&schema, upsert(1, 10.0)).unwrap();
        let base = Arc::new(initial.build());

        let mut builder = ExistingPricesBuilder::new(base);
        builder.set(&schema, upsert(1, 12.0)).unwrap();
        let built = builder.build();
        assert_eq!(built.version, 2);
        assert_eq!(
            built
                .get(&PriceKey::new(1, "basic", "USD"))
                .unwrap()
                .price_with_tax,
            12.0
        );
    }

    #[test]
    fn handling_change_alone_is_a_change() {
        let schema = EntitySchema::open("product");
        let base = Arc::new(Prices::default());
        let mut builder = ExistingPricesBuilder::new(Arc::clone(&base));
        builder
            .set_inner_record_handling(&schema, PriceInnerRecordHandling::Sum)
            .unwrap();

        assert!(builder.has_changes());
        assert!(builder.build_change_set().is_empty());
        let built = builder.build();
        assert_eq!(built.inner_record_handling, PriceInnerRecordHandling::Sum);
        assert_eq!(built.version, base.version + 1);
    }

    #[test]
    fn ambiguity_checked_against_pending_state() {
        let schema = EntitySchema::open("product");
        let mut initial = InitialPricesBuilder::new();
        initial.set(&schema, upsert(1, 10.0)).unwrap();
        let base = Arc::new(initial.build());

        let mut builder = ExistingPricesBuilder::new(base);
        // removing the conflicting price first clears the way
        builder
            .remove(&schema, &PriceKey::new(1, "basic", "USD"))
            .unwrap();
        builder.set(&schema, upsert(2, 12.0)).unwrap();
        assert_eq!(builder.prices().len(), 1);
    }

    #[test]
    fn not_fetched_container_refuses_edits() {
        let schema = EntitySchema::open("product");
        let mut builder = ExistingPricesBuilder::new(Arc::new(Prices::not_fetched()));
        assert_eq!(
            builder.set(&schema, upsert(1, 10.0)).unwrap_err(),
            EntityError::PricesNotFetched
        );
    }
}
