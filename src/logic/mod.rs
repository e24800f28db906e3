//! Consistency checks and the entity-level mutation engine.

pub mod ambiguity;
pub mod mutate;

pub use ambiguity::assert_price_unambiguous;
pub use mutate::{apply_entity_upsert, mutate_entity};
