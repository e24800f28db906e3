//! Serde representation for `BTreeMap<StructKey, Value>` container maps.
//!
//! serde_json rejects non-string map keys, so the container maps serialize
//! as a sequence of their values; every value embeds its own key, and the
//! map is rebuilt from those embedded keys on deserialize.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// A value that carries its own map key.
pub trait Keyed {
    type Key: Ord + Clone;

    fn map_key(&self) -> Self::Key;
}

pub fn serialize<V, S>(map: &BTreeMap<V::Key, V>, serializer: S) -> Result<S::Ok, S::Error>
where
    V: Keyed + Serialize,
    S: Serializer,
{
    serializer.collect_seq(map.values())
}

pub fn deserialize<'de, V, D>(deserializer: D) -> Result<BTreeMap<V::Key, V>, D::Error>
where
    V: Keyed + Deserialize<'de>,
    D: Deserializer<'de>,
{
    let values = Vec::<V>::deserialize(deserializer)?;
    Ok(values.into_iter().map(|v| (v.map_key(), v)).collect())
}
