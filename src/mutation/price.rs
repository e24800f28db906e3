use serde::{Deserialize, Serialize};

use crate::error::{EntityError, Result};
use crate::model::{DateRange, EntitySchema, Price, PriceInnerRecordHandling, PriceKey};

/// Sets a price record, creating it when absent. Change detection compares
/// the whole candidate value against the previous one; any single field
/// difference produces a new version, identical values produce none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertPriceMutation {
    pub key: PriceKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inner_record_id: Option<i32>,
    pub price_without_tax: f64,
    pub tax_rate: f64,
    pub price_with_tax: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validity: Option<DateRange>,
    pub sellable: bool,
}

impl UpsertPriceMutation {
    /// Price this mutation would produce at the given version.
    pub fn to_price(&self, version: u32) -> Price {
        Price {
            key: self.key.clone(),
            inner_record_id: self.inner_record_id,
            price_without_tax: self.price_without_tax,
            tax_rate: self.tax_rate,
            price_with_tax: self.price_with_tax,
            validity: self.validity.clone(),
            sellable: self.sellable,
            version,
            dropped: false,
        }
    }
}

/// Tombstones a price record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovePriceMutation {
    pub key: PriceKey,
}

/// A single price mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PriceMutation {
    Upsert(UpsertPriceMutation),
    Remove(RemovePriceMutation),
}

impl PriceMutation {
    pub fn remove(key: PriceKey) -> Self {
        Self::Remove(RemovePriceMutation { key })
    }

    pub fn key(&self) -> &PriceKey {
        match self {
            Self::Upsert(m) => &m.key,
            Self::Remove(m) => &m.key,
        }
    }

    /// Pure local transformation; same no-op/version contract as the other
    /// mutation kinds. Price ambiguity is checked separately by whoever
    /// admits the mutation (builders and the orchestrator), because it needs
    /// visibility over all other prices.
    pub fn mutate_local(&self, schema: &EntitySchema, previous: Option<&Price>) -> Result<Price> {
        schema.verify_prices()?;
        self.apply_unchecked(previous)
    }

    pub(crate) fn apply_unchecked(&self, previous: Option<&Price>) -> Result<Price> {
        match self {
            Self::Upsert(m) => Ok(match previous {
                None => m.to_price(1),
                Some(prev) if prev.exists() && prev.same_values(&m.to_price(prev.version)) => {
                    prev.clone()
                }
                Some(prev) => m.to_price(prev.version + 1),
            }),
            Self::Remove(m) => match previous {
                Some(prev) if prev.exists() => Ok(prev.drop_next()),
                _ => Err(EntityError::MissingTarget {
                    kind: "price",
                    key: m.key.to_string(),
                }),
            },
        }
    }
}

/// Switches how prices sharing an inner record id combine during price
/// selection. Container-level state: no individual price is touched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetPriceInnerRecordHandlingMutation {
    pub handling: PriceInnerRecordHandling,
}

impl SetPriceInnerRecordHandlingMutation {
    pub fn new(handling: PriceInnerRecordHandling) -> Self {
        Self { handling }
    }

    /// Resulting handling mode; the caller compares against the current one
    /// to detect the no-op.
    pub fn mutate_local(
        &self,
        schema: &EntitySchema,
        _current: PriceInnerRecordHandling,
    ) -> Result<PriceInnerRecordHandling> {
        schema.verify_prices()?;
        Ok(self.handling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn upsert(id: i32, amount: f64) -> UpsertPriceMutation {
        UpsertPriceMutation {
            key: PriceKey::new(id, "basic", "USD"),
            inner_record_id: None,
            price_without_tax: amount,
            tax_rate: 21.0,
            price_with_tax: amount * 1.21,
            validity: None,
            sellable: true,
        }
    }

    #[test]
    fn upsert_creates_then_noops_then_bumps() {
        let schema = EntitySchema::open("product");

        let first = PriceMutation::Upsert(upsert(1, 100.0))
            .mutate_local(&schema, None)
            .unwrap();
        assert_eq!(first.version, 1);

        let unchanged = PriceMutation::Upsert(upsert(1, 100.0))
            .mutate_local(&schema, Some(&first))
            .unwrap();
        assert_eq!(unchanged.version, 1);

        let raised = PriceMutation::Upsert(upsert(1, 110.0))
            .mutate_local(&schema, Some(&first))
            .unwrap();
        assert_eq!(raised.version, 2);
        assert_eq!(raised.price_without_tax, 110.0);
    }

    #[test]
    fn validity_change_is_a_real_change() {
        let schema = EntitySchema::open("product");
        let base = PriceMutation::Upsert(upsert(1, 100.0))
            .mutate_local(&schema, None)
            .unwrap();

        let mut with_validity = upsert(1, 100.0);
        with_validity.validity = Some(DateRange::since(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let changed = PriceMutation::Upsert(with_validity)
            .mutate_local(&schema, Some(&base))
            .unwrap();
        assert_eq!(changed.version, 2);
    }

    #[test]
    fn remove_missing_price_fails() {
        let schema = EntitySchema::open("product");
        let mutation = PriceMutation::remove(PriceKey::new(9, "basic", "USD"));
        assert!(matches!(
            mutation.mutate_local(&schema, None),
            Err(EntityError::MissingTarget { .. })
        ));
    }

    #[test]
    fn prices_must_be_supported_by_schema() {
        let schema = EntitySchema::new("tag");
        assert!(matches!(
            PriceMutation::Upsert(upsert(1, 10.0)).mutate_local(&schema, None),
            Err(EntityError::PricesNotSupported { .. })
        ));
    }
}
