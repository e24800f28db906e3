use thiserror::Error;

use crate::model::{DataType, Locale, PriceKey};

/// Errors raised while validating or applying entity mutations. Every
/// failure is reported at the call that caused it; nothing is deferred to
/// build time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EntityError {
    #[error("attribute `{name}` expects {expected} but got {actual}")]
    InvalidDataType {
        name: String,
        expected: DataType,
        actual: DataType,
    },

    #[error("attribute `{name}` is sortable and cannot hold an array")]
    SortableArray { name: String },

    #[error("locale `{locale}` of `{name}` is not supported by the schema")]
    LocaleNotSupported { name: String, locale: Locale },

    #[error("attribute `{name}` locale mismatch (declared localized: {localized})")]
    LocaleMismatch { name: String, localized: bool },

    #[error("attribute `{name}` is not in the schema and the schema does not allow adding attributes")]
    AttributeNotInSchema { name: String },

    #[error("associated data `{name}` is not in the schema and the schema does not allow adding associated data")]
    AssociatedDataNotInSchema { name: String },

    #[error("reference `{name}` is not in the schema and the schema does not allow adding references")]
    ReferenceNotInSchema { name: String },

    #[error("entity type `{entity_type}` does not support hierarchy placement")]
    HierarchyNotSupported { entity_type: String },

    #[error("entity type `{entity_type}` does not support prices")]
    PricesNotSupported { entity_type: String },

    #[error("cannot remove {kind} `{key}`: no such value exists")]
    MissingTarget { kind: &'static str, key: String },

    #[error("price `{candidate}` is ambiguous: `{existing}` covers the same price list, currency and inner record with overlapping validity")]
    AmbiguousPrice {
        existing: PriceKey,
        candidate: PriceKey,
    },

    #[error("prices were not fetched with this entity snapshot")]
    PricesNotFetched,
}

pub type Result<T> = std::result::Result<T, EntityError>;
