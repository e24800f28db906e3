pub mod associated_data;
pub mod attribute;
pub mod common;
pub mod entity;
pub(crate) mod keyed_map;
pub mod price;
pub mod reference;
pub mod schema;

pub use associated_data::*;
pub use attribute::*;
pub use common::*;
pub use entity::*;
pub use price::*;
pub use reference::*;
pub use schema::*;
