use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::model::DateRange;

/// Natural key of a price record. The `price_id` is assigned by the caller
/// or an external system and is unique only within its price list/currency
/// combination.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PriceKey {
    pub price_id: i32,
    pub price_list: String,
    pub currency: String,
}

impl PriceKey {
    pub fn new(price_id: i32, price_list: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            price_id,
            price_list: price_list.into(),
            currency: currency.into(),
        }
    }
}

impl fmt::Display for PriceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.price_id, self.price_list, self.currency)
    }
}

/// Immutable versioned price record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub key: PriceKey,
    /// Groups prices of variants/parts under a shared master record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inner_record_id: Option<i32>,
    pub price_without_tax: f64,
    pub tax_rate: f64,
    pub price_with_tax: f64,
    /// Absent validity means the price is always valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validity: Option<DateRange>,
    pub sellable: bool,
    pub version: u32,
    #[serde(default)]
    pub dropped: bool,
}

impl crate::model::keyed_map::Keyed for Price {
    type Key = PriceKey;

    fn map_key(&self) -> PriceKey {
        self.key.clone()
    }
}

impl Price {
    pub fn exists(&self) -> bool {
        !self.dropped
    }

    /// Whole-value comparison of the business fields, ignoring version and
    /// tombstone state. This is the no-op detection basis for upserts.
    pub fn same_values(&self, other: &Price) -> bool {
        self.key == other.key
            && self.inner_record_id == other.inner_record_id
            && self.price_without_tax == other.price_without_tax
            && self.tax_rate == other.tax_rate
            && self.price_with_tax == other.price_with_tax
            && self.validity == other.validity
            && self.sellable == other.sellable
    }

    pub fn drop_next(&self) -> Self {
        Self {
            version: self.version + 1,
            dropped: true,
            ..self.clone()
        }
    }
}

/// How prices sharing an `inner_record_id` combine during price selection.
/// The selection algorithm itself lives outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceInnerRecordHandling {
    None,
    FirstOccurrence,
    Sum,
}

impl Default for PriceInnerRecordHandling {
    fn default() -> Self {
        PriceInnerRecordHandling::None
    }
}

/// Immutable price container. Carries its own version because the
/// inner-record-handling mode is container-level state that can change
/// without touching any individual price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prices {
    #[serde(with = "crate::model::keyed_map")]
    pub values: BTreeMap<PriceKey, Price>,
    pub version: u32,
    pub inner_record_handling: PriceInnerRecordHandling,
    /// False when the snapshot was materialized without price data; reads
    /// that need prices must then fail instead of answering "no prices".
    #[serde(default = "fetched_default")]
    pub fetched: bool,
}

fn fetched_default() -> bool {
    true
}

impl Default for Prices {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
            version: 1,
            inner_record_handling: PriceInnerRecordHandling::None,
            fetched: true,
        }
    }
}

impl Prices {
    pub fn new(
        values: BTreeMap<PriceKey, Price>,
        version: u32,
        inner_record_handling: PriceInnerRecordHandling,
    ) -> Self {
        Self {
            values,
            version,
            inner_record_handling,
            fetched: true,
        }
    }

    /// Placeholder container for a snapshot fetched without price data.
    pub fn not_fetched() -> Self {
        Self {
            fetched: false,
            ..Self::default()
        }
    }

    pub fn get_raw(&self, key: &PriceKey) -> Option<&Price> {
        self.values.get(key)
    }

    pub fn get(&self, key: &PriceKey) -> Option<&Price> {
        self.values.get(key).filter(|p| p.exists())
    }

    /// All live prices.
    pub fn iter(&self) -> impl Iterator<Item = &Price> {
        self.values.values().filter(|p| p.exists())
    }

    pub fn is_empty(&self) -> bool {
        self.values.values().all(|p| p.dropped)
    }
}
