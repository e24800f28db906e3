//! Builders over immutable snapshots.
//!
//! `Initial*` builders assemble state for something that does not exist yet;
//! `Existing*` builders wrap a read-only base and keep one pending mutation
//! per touched key, the last write winning. Reads on an existing builder see
//! the pending edits applied over the base; `build_change_set` diffs the two
//! into the minimal mutation list and `build`/`to_instance` materialize the
//! edited value, sharing every untouched container with the base.

pub mod associated_data;
pub mod attributes;
pub mod entity;
pub mod prices;
pub mod references;

pub use associated_data::*;
pub use attributes::*;
pub use entity::*;
pub use prices::*;
pub use references::*;
