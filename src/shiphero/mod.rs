//! ShipHero account operations used by the removal workflow

pub mod data;
pub mod naming;
pub mod orders;

pub use data::{DataService, Inventory};
pub use orders::Orders;
