//! Warehouse models

use serde::{Deserialize, Serialize};

/// Postal address of a warehouse
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarehouseAddress {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address1: Option<String>,
    #[serde(default)]
    pub address2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Warehouse as returned by `account { data { warehouses } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: String,
    #[serde(default)]
    pub legacy_id: Option<i64>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub address: Option<WarehouseAddress>,
}

impl Warehouse {
    /// Address name, then identifier, then a placeholder.
    pub fn display_name(&self) -> &str {
        self.address
            .as_ref()
            .and_then(|a| non_empty(&a.name))
            .or_else(|| non_empty(&self.identifier))
            .unwrap_or(UNKNOWN_WAREHOUSE)
    }
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|s| !s.trim().is_empty())
}

pub const UNKNOWN_WAREHOUSE: &str = "Unknown Warehouse";
pub const NO_WAREHOUSE: &str = "No Warehouse";
