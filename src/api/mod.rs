//! GraphQL plumbing for the ShipHero public API

pub mod cache;
pub mod client;
pub mod graphql;
pub mod paginate;

pub use cache::{CacheKey, CacheStats, ResponseCache};
pub use client::{GraphqlClient, RequestError};
pub use graphql::{GraphqlError, GraphqlResponse};
pub use paginate::{BulkFetch, BulkFetcher, PageSource, PagedQuery, StopReason};
