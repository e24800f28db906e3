//! Client-side entity model of a document-oriented database.
//!
//! Entities are immutable versioned snapshots: attributes, associated data,
//! prices, references and an optional hierarchy placement, each value
//! carrying its own version and tombstone flag. Edits never touch a
//! snapshot; they are expressed as [`mutation`]s, staged through
//! [`builder`]s and folded by [`logic::mutate_entity`] into a new snapshot
//! plus a minimal, deterministically ordered change-set for the server.
//!
//! Schemas are supplied by the caller and validated against on every
//! mutating call; evolution flags on the schema decide whether undeclared
//! attributes, locales, prices or references may be introduced on the fly.

pub mod builder;
pub mod error;
pub mod logic;
pub mod model;
pub mod mutation;

pub use error::{EntityError, Result};
