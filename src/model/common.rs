use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// IETF language tag identifying a localization, e.g. `en` or `cs-CZ`.
///
/// A key carrying a locale addresses a localized slot; a key without one
/// addresses the global slot of the same name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locale(pub String);

impl Locale {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Locale {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

/// Closed set of value kinds an attribute or associated-data slot may hold.
///
/// Values themselves travel as `serde_json::Value`; this enum is what schemas
/// declare and what validation pattern-matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DataType {
    String,
    Number,
    Boolean,
    DateRange,
    /// Nested serializable structure (JSON object).
    Object,
    /// Homogeneous array of any of the scalar kinds.
    Array,
}

impl DataType {
    /// Classify a JSON value into its kind. `DateRange` cannot be inferred
    /// from raw JSON (it serializes as an object), so inference never
    /// produces it; schemas declaring `DateRange` accept object payloads.
    pub fn of(value: &serde_json::Value) -> DataType {
        match value {
            serde_json::Value::String(_) => DataType::String,
            serde_json::Value::Number(_) => DataType::Number,
            serde_json::Value::Bool(_) => DataType::Boolean,
            serde_json::Value::Object(_) => DataType::Object,
            serde_json::Value::Array(_) => DataType::Array,
            serde_json::Value::Null => DataType::Object,
        }
    }

    /// Check a JSON payload against this declared kind.
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match (value, self) {
            (serde_json::Value::String(_), DataType::String) => true,
            (serde_json::Value::Number(_), DataType::Number) => true,
            (serde_json::Value::Bool(_), DataType::Boolean) => true,
            (serde_json::Value::Object(_), DataType::Object) => true,
            (serde_json::Value::Object(_), DataType::DateRange) => true,
            (serde_json::Value::Array(_), DataType::Array) => true,
            (serde_json::Value::Null, _) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::String => "String",
            DataType::Number => "Number",
            DataType::Boolean => "Boolean",
            DataType::DateRange => "DateRange",
            DataType::Object => "Object",
            DataType::Array => "Array",
        };
        f.write_str(name)
    }
}

/// Validity interval with optional open ends. An absent bound is unbounded
/// on that side; a price with no validity at all is treated as always valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self { from, to }
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn since(from: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: None,
        }
    }

    pub fn until(to: DateTime<Utc>) -> Self {
        Self {
            from: None,
            to: Some(to),
        }
    }

    /// Whether the instant falls inside this interval (bounds inclusive).
    pub fn contains(&self, moment: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| moment >= from) && self.to.map_or(true, |to| moment <= to)
    }

    /// Whether two intervals share at least one instant. Open ends extend
    /// to infinity on their side.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        let starts_before_other_ends = match (self.from, other.to) {
            (Some(from), Some(to)) => from <= to,
            _ => true,
        };
        let ends_after_other_starts = match (self.to, other.from) {
            (Some(to), Some(from)) => to >= from,
            _ => true,
        };
        starts_before_other_ends && ends_after_other_starts
    }
}

/// Overlap test where `None` means "always valid" and thus overlaps
/// everything.
pub fn validity_overlaps(a: Option<&DateRange>, b: Option<&DateRange>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.overlaps(b),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(month: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, month, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn data_type_matches_json_kinds() {
        assert!(DataType::String.matches(&serde_json::json!("abc")));
        assert!(DataType::Number.matches(&serde_json::json!(42)));
        assert!(DataType::Boolean.matches(&serde_json::json!(true)));
        assert!(DataType::Array.matches(&serde_json::json!([1, 2])));
        assert!(DataType::Object.matches(&serde_json::json!({"a": 1})));
        assert!(!DataType::Number.matches(&serde_json::json!("42")));
        assert!(!DataType::String.matches(&serde_json::json!([1])));
    }

    #[test]
    fn overlapping_ranges_detected() {
        let jan_jun = DateRange::between(at(1), at(6));
        let mar_sep = DateRange::between(at(3), at(9));
        let jul_dec = DateRange::between(at(7), at(12));

        assert!(jan_jun.overlaps(&mar_sep));
        assert!(mar_sep.overlaps(&jan_jun));
        assert!(!jan_jun.overlaps(&jul_dec));
    }

    #[test]
    fn open_ended_ranges_overlap() {
        let until_jun = DateRange::until(at(6));
        let since_mar = DateRange::since(at(3));
        let since_sep = DateRange::since(at(9));

        assert!(until_jun.overlaps(&since_mar));
        assert!(!until_jun.overlaps(&since_sep));
        assert!(validity_overlaps(None, Some(&since_sep)));
        assert!(validity_overlaps(None, None));
    }

    #[test]
    fn contains_respects_bounds() {
        let jan_jun = DateRange::between(at(1), at(6));
        assert!(jan_jun.contains(at(3)));
        assert!(jan_jun.contains(at(1)));
        assert!(!jan_jun.contains(at(7)));
    }
}
