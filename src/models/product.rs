//! Product and inventory models

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::warehouse::{NO_WAREHOUSE, UNKNOWN_WAREHOUSE};

/// Per-warehouse stock of a product, as nested in the products connection
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WarehouseProduct {
    #[serde(default)]
    pub warehouse_id: Option<String>,
    #[serde(default)]
    pub warehouse_identifier: Option<String>,
    #[serde(default)]
    pub on_hand: Option<i64>,
    #[serde(default)]
    pub available: Option<i64>,
    #[serde(default)]
    pub allocated: Option<i64>,
}

/// Node of the `products` connection
#[derive(Debug, Clone, Deserialize)]
pub struct ProductNode {
    #[serde(default)]
    pub id: Option<String>,
    pub sku: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub kit: Option<bool>,
    #[serde(default)]
    pub kit_build: Option<bool>,
    #[serde(default)]
    pub warehouse_products: Option<Vec<WarehouseProduct>>,
}

impl ProductNode {
    pub fn is_kit(&self) -> bool {
        self.kit.unwrap_or(false) || self.kit_build.unwrap_or(false)
    }

    /// One row per warehouse holding the product, or a single zero row
    /// when it is stocked nowhere. `names` maps warehouse id to name.
    pub fn into_rows(self, names: &HashMap<String, String>) -> Vec<Product> {
        let sku = self.sku;
        let name = self.name.unwrap_or_default();
        let price = self.price.unwrap_or_default();
        let active = self.active.unwrap_or(false);
        let stock = self.warehouse_products.unwrap_or_default();

        if stock.is_empty() {
            return vec![Product {
                sku,
                name,
                active,
                price,
                inventory: InventoryLevel::unstocked(),
            }];
        }

        stock
            .into_iter()
            .map(|wp| {
                let warehouse_name = match wp.warehouse_id.as_deref() {
                    Some(id) => names
                        .get(id)
                        .cloned()
                        .unwrap_or_else(|| UNKNOWN_WAREHOUSE.to_string()),
                    None => NO_WAREHOUSE.to_string(),
                };
                Product {
                    sku: sku.clone(),
                    name: name.clone(),
                    active,
                    price: price.clone(),
                    inventory: InventoryLevel {
                        available: wp.available.unwrap_or(0),
                        on_hand: wp.on_hand.unwrap_or(0),
                        allocated: wp.allocated.unwrap_or(0),
                        warehouse_id: wp.warehouse_id,
                        warehouse_identifier: wp.warehouse_identifier,
                        warehouse_name,
                    },
                }
            })
            .collect()
    }
}

/// Stock of one product in one warehouse
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventoryLevel {
    pub available: i64,
    pub on_hand: i64,
    pub allocated: i64,
    pub warehouse_id: Option<String>,
    pub warehouse_identifier: Option<String>,
    pub warehouse_name: String,
}

impl InventoryLevel {
    fn unstocked() -> Self {
        Self {
            warehouse_name: NO_WAREHOUSE.to_string(),
            ..Self::default()
        }
    }
}

/// Flattened inventory row: a product in one warehouse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub sku: String,
    pub name: String,
    pub active: bool,
    pub price: String,
    pub inventory: InventoryLevel,
}
