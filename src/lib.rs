//! ShipHero client core for warehouse removals
//!
//! Token lifecycle, cached account reads and credit-paced bulk imports
//! against the ShipHero public GraphQL API.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod session;
pub mod shiphero;

pub use session::Session;
