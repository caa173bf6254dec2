//! Sales and purchase order creation
//!
//! Mutations go straight through the request executor: no caching, and no
//! retry beyond the executor's single auth retry.

use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use super::naming;
use crate::api::{GraphqlClient, RequestError};
use crate::models::{
    Address, CreatedOrder, CreatedPurchaseOrder, OrderLineItem, PurchaseOrderRequest,
    SalesOrderRequest,
};

pub const DEFAULT_SHOP_NAME: &str = "Warehouse Removal";
const ZERO: &str = "0.00";

const CREATE_ORDER_MUTATION: &str = r#"
mutation CreateOrder($data: CreateOrderInput!) {
  order_create(data: $data) {
    request_id
    complexity
    order {
      id
      legacy_id
      order_number
      fulfillment_status
      account_id
      email
    }
  }
}
"#;

const CREATE_PURCHASE_ORDER_MUTATION: &str = r#"
mutation CreatePurchaseOrder($data: PurchaseOrderCreateInput!) {
  purchase_order_create(data: $data) {
    request_id
    complexity
    purchase_order {
      id
      po_number
      warehouse_id
      subtotal
      total_price
    }
  }
}
"#;

#[derive(Deserialize)]
struct OrderCreateData {
    order_create: OrderCreatePayload,
}

#[derive(Deserialize)]
struct OrderCreatePayload {
    order: Option<CreatedOrder>,
}

#[derive(Deserialize)]
struct PurchaseOrderCreateData {
    purchase_order_create: PurchaseOrderCreatePayload,
}

#[derive(Deserialize)]
struct PurchaseOrderCreatePayload {
    purchase_order: Option<CreatedPurchaseOrder>,
}

fn address_input(address: &Address, email: &str) -> Value {
    let country = address.country.as_deref().unwrap_or("US");
    let mut input = json!({
        "first_name": address.first_name,
        "last_name": address.last_name,
        "address1": address.address1,
        "city": address.city,
        "state": address.state,
        "zip": address.zip,
        "country": country,
        "country_code": country,
        "email": address.email.as_deref().unwrap_or(email),
    });
    if let Some(address2) = &address.address2 {
        input["address2"] = json!(address2);
    }
    if let Some(phone) = &address.phone {
        input["phone"] = json!(phone);
    }
    input
}

fn sales_line_item(item: &OrderLineItem, partner_id: String) -> Value {
    json!({
        "sku": item.sku,
        "partner_line_item_id": partner_id,
        "quantity": item.quantity,
        "price": item.price.as_deref().unwrap_or(ZERO),
        "product_name": item
            .product_name
            .clone()
            .unwrap_or_else(|| format!("Product {}", item.sku)),
        "fulfillment_status": "pending",
        "quantity_pending_fulfillment": item.quantity,
    })
}

/// `order_create` input with the removal workflow's defaults applied.
pub fn sales_order_input(request: &SalesOrderRequest) -> Value {
    let now = Utc::now();
    let stamp = now.timestamp_millis();
    let address = address_input(&request.shipping_address, &request.email);

    let mut data = json!({
        "order_number": request
            .order_number
            .clone()
            .unwrap_or_else(naming::sales_order_number),
        "shop_name": request.shop_name.as_deref().unwrap_or(DEFAULT_SHOP_NAME),
        "fulfillment_status": "pending",
        "order_date": now.to_rfc3339_opts(SecondsFormat::Secs, true),
        "currency": "USD",
        "total_tax": ZERO,
        "total_discounts": ZERO,
        "subtotal": request.subtotal.as_deref().unwrap_or(ZERO),
        "total_price": request.total_price.as_deref().unwrap_or(ZERO),
        "email": request.email,
        "shipping_lines": {
            "title": "Standard Shipping",
            "price": ZERO,
            "carrier": "USPS",
            "method": "Ground"
        },
        "shipping_address": address.clone(),
        "billing_address": address,
        "line_items": request
            .line_items
            .iter()
            .enumerate()
            .map(|(i, item)| sales_line_item(item, format!("{}-{}", stamp, i)))
            .collect::<Vec<_>>(),
    });
    if let Some(account_id) = &request.customer_account_id {
        data["account_id"] = json!(account_id);
    }
    data
}

/// `purchase_order_create` input with defaults applied.
pub fn purchase_order_input(request: &PurchaseOrderRequest) -> Value {
    let mut data = json!({
        "warehouse_id": request.warehouse_id,
        "po_number": request
            .po_number
            .clone()
            .unwrap_or_else(naming::purchase_order_number),
        "po_date": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        "line_items": request
            .line_items
            .iter()
            .map(|item| json!({
                "sku": item.sku,
                "quantity": item.quantity,
                "expected_cost": item.price.as_deref().unwrap_or(ZERO),
            }))
            .collect::<Vec<_>>(),
    });
    if let Some(vendor_id) = &request.vendor_id {
        data["vendor_id"] = json!(vendor_id);
    }
    data
}

/// Order mutations against the ShipHero account.
#[derive(Clone)]
pub struct Orders {
    client: GraphqlClient,
}

impl Orders {
    pub fn new(client: GraphqlClient) -> Self {
        Self { client }
    }

    pub async fn create_sales_order(
        &self,
        request: &SalesOrderRequest,
    ) -> Result<CreatedOrder, RequestError> {
        let data = sales_order_input(request);
        tracing::info!(
            "Creating sales order {} with {} line items",
            data["order_number"],
            request.line_items.len()
        );

        let result: OrderCreateData = self
            .client
            .execute(CREATE_ORDER_MUTATION, &json!({ "data": data }))
            .await?;
        result
            .order_create
            .order
            .ok_or_else(|| RequestError::Decode("order_create returned no order".to_string()))
    }

    pub async fn create_purchase_order(
        &self,
        request: &PurchaseOrderRequest,
    ) -> Result<CreatedPurchaseOrder, RequestError> {
        let data = purchase_order_input(request);
        tracing::info!(
            "Creating purchase order {} for warehouse {}",
            data["po_number"],
            request.warehouse_id
        );

        let result: PurchaseOrderCreateData = self
            .client
            .execute(CREATE_PURCHASE_ORDER_MUTATION, &json!({ "data": data }))
            .await?;
        result.purchase_order_create.purchase_order.ok_or_else(|| {
            RequestError::Decode("purchase_order_create returned no purchase order".to_string())
        })
    }
}
