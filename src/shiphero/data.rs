//! Cached inventory and warehouse reads
//!
//! Inventory is walked page by page with the bulk fetcher, flattened to one
//! row per (product, warehouse) and kept in a [`ResponseCache`] alongside
//! the warehouse list used to name those rows.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::api::cache::{CacheKey, CacheStats, ResponseCache};
use crate::api::paginate::{BulkFetch, BulkFetcher, PagedQuery, StopReason};
use crate::api::{GraphqlClient, RequestError};
use crate::config::{CacheSettings, PacingConfig};
use crate::models::{Product, ProductNode, Warehouse};

const INVENTORY_NAMESPACE: &str = "inventory";
const WAREHOUSES_NAMESPACE: &str = "warehouses";

const WAREHOUSES_QUERY: &str = r#"
query Warehouses {
  account {
    request_id
    complexity
    data {
      warehouses {
        id
        legacy_id
        identifier
        address { name address1 address2 city state country zip phone }
      }
    }
  }
}
"#;

const PRODUCTS_QUERY: &str = r#"
query Inventory($first: Int, $after: String) {
  products {
    request_id
    complexity
    data(first: $first, after: $after) {
      edges {
        node {
          id
          sku
          name
          price
          barcode
          active
          kit
          kit_build
          warehouse_products {
            warehouse_id
            warehouse_identifier
            on_hand
            available
            allocated
          }
        }
        cursor
      }
      pageInfo { hasNextPage endCursor }
    }
  }
}
"#;

fn products_query() -> PagedQuery {
    PagedQuery::new(PRODUCTS_QUERY, &["products", "data"])
}

#[derive(Deserialize)]
struct WarehousesData {
    account: AccountNode,
}

#[derive(Deserialize)]
struct AccountNode {
    data: AccountWarehouses,
}

#[derive(Deserialize)]
struct AccountWarehouses {
    #[serde(default)]
    warehouses: Option<Vec<Warehouse>>,
}

/// Drop kits and build-kits, then one row per warehouse stock entry.
pub fn flatten_inventory(nodes: Vec<ProductNode>, names: &HashMap<String, String>) -> Vec<Product> {
    let total = nodes.len();
    let rows: Vec<Product> = nodes
        .into_iter()
        .filter(|node| !node.is_kit())
        .flat_map(|node| node.into_rows(names))
        .collect();
    tracing::debug!("Flattened {} products into {} inventory rows", total, rows.len());
    rows
}

/// Inventory rows plus how the walk that produced them ended. Only
/// complete walks are cached, so rows served from the cache are always
/// `complete`.
#[derive(Debug, Clone)]
pub struct Inventory {
    pub rows: Vec<Product>,
    pub complete: bool,
    pub next_cursor: Option<String>,
    pub stop_reason: Option<StopReason>,
}

impl Inventory {
    fn complete(rows: Vec<Product>) -> Self {
        Self {
            rows,
            complete: true,
            next_cursor: None,
            stop_reason: None,
        }
    }

    fn retain(mut self, keep: impl FnMut(&Product) -> bool) -> Self {
        self.rows.retain(keep);
        self
    }
}

impl From<BulkFetch<Product>> for Inventory {
    fn from(fetch: BulkFetch<Product>) -> Self {
        Self {
            rows: fetch.items,
            complete: fetch.complete,
            next_cursor: fetch.next_cursor,
            stop_reason: fetch.stop_reason,
        }
    }
}

/// Why an inventory refresh produced nothing cacheable. A partial walk
/// travels as an error so the cache keeps whatever good rows it had.
#[derive(Debug, Clone, thiserror::Error)]
enum InventoryFetchError {
    #[error(transparent)]
    Request(RequestError),
    #[error("{}", describe_partial(.0))]
    Partial(BulkFetch<Product>),
}

fn describe_partial(fetch: &BulkFetch<Product>) -> String {
    match &fetch.stop_reason {
        Some(reason) => format!(
            "inventory walk stopped after {} pages: {}",
            fetch.pages_fetched, reason
        ),
        None => format!("inventory walk stopped after {} pages", fetch.pages_fetched),
    }
}

struct Inner {
    client: GraphqlClient,
    pacing: PacingConfig,
    ttl: CacheSettings,
    inventory: ResponseCache<Vec<Product>, InventoryFetchError>,
    warehouses: ResponseCache<Vec<Warehouse>, RequestError>,
}

/// Read side of the ShipHero account, with TTL caching and deduplication.
#[derive(Clone)]
pub struct DataService {
    inner: Arc<Inner>,
}

impl DataService {
    pub fn new(client: GraphqlClient, pacing: PacingConfig, ttl: CacheSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                pacing,
                ttl,
                inventory: ResponseCache::new(),
                warehouses: ResponseCache::new(),
            }),
        }
    }

    pub async fn warehouses(&self, force: bool) -> Result<Vec<Warehouse>, RequestError> {
        let client = self.inner.client.clone();
        self.inner
            .warehouses
            .get_with(
                &CacheKey::namespace(WAREHOUSES_NAMESPACE),
                self.inner.ttl.warehouses_ttl(),
                force,
                move || async move {
                    tracing::info!("Fetching warehouses");
                    let data: WarehousesData =
                        client.execute(WAREHOUSES_QUERY, &serde_json::json!({})).await?;
                    Ok::<_, RequestError>(data.account.data.warehouses.unwrap_or_default())
                },
            )
            .await
    }

    /// Flattened inventory of every non-kit product.
    ///
    /// A walk that stops early is never cached. If earlier complete rows are
    /// cached they are served instead; otherwise the partial rows come back
    /// with `complete == false`.
    pub async fn inventory(&self, force: bool) -> Result<Inventory, RequestError> {
        let this = self.clone();
        let cached = self
            .inner
            .inventory
            .get_with(
                &CacheKey::namespace(INVENTORY_NAMESPACE),
                self.inner.ttl.inventory_ttl(),
                force,
                move || async move {
                    match this.import_products(None).await {
                        Ok(fetch) if fetch.complete => Ok(fetch.items),
                        Ok(fetch) => Err(InventoryFetchError::Partial(fetch)),
                        Err(e) => Err(InventoryFetchError::Request(e)),
                    }
                },
            )
            .await;

        match cached {
            Ok(rows) => Ok(Inventory::complete(rows)),
            Err(InventoryFetchError::Partial(fetch)) => {
                tracing::warn!(
                    "Inventory is partial, not cached: {} rows from {} pages",
                    fetch.items.len(),
                    fetch.pages_fetched
                );
                Ok(Inventory::from(fetch))
            }
            Err(InventoryFetchError::Request(e)) => Err(e),
        }
    }

    pub async fn inventory_by_warehouse(
        &self,
        warehouse_id: &str,
        force: bool,
    ) -> Result<Inventory, RequestError> {
        let inventory = self.inventory(force).await?;
        Ok(inventory.retain(|p| p.inventory.warehouse_id.as_deref() == Some(warehouse_id)))
    }

    pub async fn active_products(&self, force: bool) -> Result<Inventory, RequestError> {
        let inventory = self.inventory(force).await?;
        Ok(inventory.retain(|p| p.active))
    }

    /// Uncached bulk walk of the products connection, starting after
    /// `cursor`. Warehouse names come from the warehouse cache; if that
    /// fails, rows are still produced with placeholder names.
    pub async fn import_products(
        &self,
        cursor: Option<String>,
    ) -> Result<BulkFetch<Product>, RequestError> {
        let names = self.warehouse_names().await;
        let fetcher = BulkFetcher::new(&self.inner.client, self.inner.pacing.clone());

        tracing::info!("Fetching products from ShipHero");
        let fetch = fetcher
            .fetch_from::<ProductNode>(&products_query(), cursor)
            .await?;
        Ok(fetch.map_items(|nodes| flatten_inventory(nodes, &names)))
    }

    async fn warehouse_names(&self) -> HashMap<String, String> {
        match self.warehouses(false).await {
            Ok(warehouses) => warehouses
                .iter()
                .map(|w| (w.id.clone(), w.display_name().to_string()))
                .collect(),
            Err(e) => {
                tracing::warn!("Could not load warehouse names: {}", e);
                HashMap::new()
            }
        }
    }

    pub fn clear_cache(&self) {
        self.inner.inventory.clear();
        self.inner.warehouses.clear();
        tracing::info!("ShipHero data cache cleared");
    }

    pub fn cache_stats(&self) -> CacheStats {
        let inventory = self.inner.inventory.stats();
        let warehouses = self.inner.warehouses.stats();
        let mut ages = inventory.ages;
        ages.extend(warehouses.ages);
        ages.sort_by(|a, b| a.key.cmp(&b.key));
        CacheStats {
            entries: inventory.entries + warehouses.entries,
            ages,
        }
    }
}
