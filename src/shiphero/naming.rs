//! Order and PO names
//!
//! ShipHero caps `order_number` and `po_number` at 32 characters, so names
//! are cut to 31 including a random 4-digit suffix.

use chrono::{Datelike, NaiveDate, Utc};

const MAX_NAME_LEN: usize = 31;
const ALPHANUMERIC: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    if getrandom::getrandom(&mut buf).is_err() {
        let nanos = Utc::now().timestamp_subsec_nanos().to_le_bytes();
        for (i, b) in buf.iter_mut().enumerate() {
            *b = nanos[i % nanos.len()].wrapping_add(i as u8);
        }
    }
    buf
}

/// Random number in 1000..=9999.
fn unique_suffix() -> u16 {
    1000 + (u16::from_le_bytes(random_bytes::<2>()) % 9000)
}

fn random_code() -> String {
    random_bytes::<4>()
        .iter()
        .map(|b| ALPHANUMERIC[*b as usize % ALPHANUMERIC.len()] as char)
        .collect()
}

/// `m/d/yy` without zero padding.
fn short_date(date: NaiveDate) -> String {
    format!("{}/{}/{:02}", date.month(), date.day(), date.year().rem_euclid(100))
}

fn prefix_upper(s: &str, n: usize) -> String {
    s.chars().take(n).collect::<String>().to_uppercase()
}

fn with_suffix(base: &str, suffix: u16) -> String {
    let suffix = suffix.to_string();
    let max_base = MAX_NAME_LEN - suffix.len() - 1;
    let base: String = base.chars().take(max_base).collect();
    format!("{}_{}", base, suffix)
}

fn sales_order_name_with(
    first_name: &str,
    last_name: &str,
    warehouse_name: &str,
    airport_code: Option<&str>,
    date: NaiveDate,
    suffix: u16,
) -> String {
    let warehouse_code = match airport_code.filter(|c| !c.trim().is_empty()) {
        Some(code) => prefix_upper(code.trim(), 3),
        None => {
            let cleaned: String = warehouse_name
                .chars()
                .filter(char::is_ascii_alphanumeric)
                .collect();
            prefix_upper(&cleaned, 3)
        }
    };
    let base = format!(
        "{}{}_{}_{}",
        prefix_upper(first_name, 1),
        prefix_upper(last_name, 3),
        short_date(date),
        warehouse_code
    );
    with_suffix(&base, suffix)
}

fn purchase_order_name_with(
    host_last_name: &str,
    warehouse_code: &str,
    date: NaiveDate,
    suffix: u16,
) -> String {
    let mut chars = host_last_name.chars();
    let last_name = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
        None => String::new(),
    };
    let base = format!(
        "{}_{}_{}",
        prefix_upper(warehouse_code, 3),
        short_date(date),
        last_name
    );
    with_suffix(&base, suffix)
}

/// Sales order name: first initial, first three letters of the last name,
/// date, warehouse code (airport code if known) and a random suffix,
/// e.g. `JSMI_9/2/25_ATL_4821`.
pub fn sales_order_name(
    first_name: &str,
    last_name: &str,
    warehouse_name: &str,
    airport_code: Option<&str>,
    date: NaiveDate,
) -> String {
    sales_order_name_with(
        first_name,
        last_name,
        warehouse_name,
        airport_code,
        date,
        unique_suffix(),
    )
}

/// Purchase order name, e.g. `ATL_9/2/25_Azimi_4821`.
pub fn purchase_order_name(host_last_name: &str, warehouse_code: &str, date: NaiveDate) -> String {
    purchase_order_name_with(host_last_name, warehouse_code, date, unique_suffix())
}

fn order_number(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis().to_string();
    let tail = &millis[millis.len().saturating_sub(8)..];
    format!("{}-{}-{}", prefix, tail, random_code())
}

/// Fallback sales order number, `SO-<last 8 digits of epoch ms>-<4 chars>`.
pub fn sales_order_number() -> String {
    order_number("SO")
}

/// Fallback purchase order number, `PO-<last 8 digits of epoch ms>-<4 chars>`.
pub fn purchase_order_number() -> String {
    order_number("PO")
}
