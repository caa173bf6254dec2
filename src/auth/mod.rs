//! Token lifecycle for the ShipHero API
//!
//! A long-lived refresh token is exchanged for short-lived access tokens.
//! The resulting [`TokenRecord`] is persisted through a layered
//! [`TokenStore`] and handed out by a [`TokenRefresher`].

pub mod refresh;
pub mod store;
pub mod tokens;

pub use refresh::{RenewalHandle, TokenRefreshError, TokenRefresher, TokenStatus};
pub use store::{KeyValueStore, StorageError, TokenBackend, TokenStore};
pub use tokens::TokenRecord;
