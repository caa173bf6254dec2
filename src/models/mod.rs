//! Data models for ShipHero entities

mod order;
mod product;
mod warehouse;

pub use order::*;
pub use product::*;
pub use warehouse::*;
