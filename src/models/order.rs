//! Sales and purchase order models

use serde::{Deserialize, Serialize};

/// Shipping/billing address for a sales order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub first_name: String,
    pub last_name: String,
    pub address1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address2: Option<String>,
    pub city: String,
    pub state: String,
    pub zip: String,
    /// Two-letter country code; `US` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLineItem {
    pub sku: String,
    pub quantity: u32,
    /// Decimal string; `0.00` when absent.
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
}

impl OrderLineItem {
    pub fn new(sku: impl Into<String>, quantity: u32) -> Self {
        Self {
            sku: sku.into(),
            quantity,
            price: None,
            product_name: None,
        }
    }
}

/// Input for `order_create`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SalesOrderRequest {
    /// Generated when absent.
    #[serde(default)]
    pub order_number: Option<String>,
    #[serde(default)]
    pub shop_name: Option<String>,
    /// 3PL customer account the order belongs to.
    #[serde(default)]
    pub customer_account_id: Option<String>,
    pub email: String,
    pub shipping_address: Address,
    pub line_items: Vec<OrderLineItem>,
    #[serde(default)]
    pub subtotal: Option<String>,
    #[serde(default)]
    pub total_price: Option<String>,
}

/// Input for `purchase_order_create`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrderRequest {
    pub warehouse_id: String,
    #[serde(default)]
    pub vendor_id: Option<String>,
    /// Generated when absent.
    #[serde(default)]
    pub po_number: Option<String>,
    pub line_items: Vec<OrderLineItem>,
}

/// Order returned by `order_create`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedOrder {
    pub id: String,
    #[serde(default)]
    pub legacy_id: Option<i64>,
    #[serde(default)]
    pub order_number: Option<String>,
    #[serde(default)]
    pub fulfillment_status: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Purchase order returned by `purchase_order_create`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedPurchaseOrder {
    pub id: String,
    #[serde(default)]
    pub po_number: Option<String>,
    #[serde(default)]
    pub warehouse_id: Option<String>,
    #[serde(default)]
    pub subtotal: Option<String>,
    #[serde(default)]
    pub total_price: Option<String>,
}
