//! GraphQL wire types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request body for the GraphQL endpoint.
#[derive(Debug, Serialize)]
pub struct GraphqlRequest<'a> {
    pub query: &'a str,
    pub variables: &'a Value,
}

/// Response envelope: `data` and/or `errors`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphqlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Option<Vec<GraphqlError>>,
}

/// Error codes arrive as numbers (ShipHero's credit errors) or strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Number(i64),
    Text(String),
}

impl ErrorCode {
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }
}

const AUTH_ERROR_CODES: &[&str] = &["UNAUTHENTICATED", "UNAUTHORIZED", "INVALID_TOKEN"];

/// One entry of the `errors` array, kept verbatim for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
    /// Vendor fields such as `required_credits` and `remaining_credits`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GraphqlError {
    fn extension_code(&self) -> Option<&str> {
        self.extensions
            .as_ref()
            .and_then(|ext| ext.get("code"))
            .and_then(Value::as_str)
    }

    pub fn is_unauthenticated(&self) -> bool {
        let matches = |code: &str| {
            AUTH_ERROR_CODES
                .iter()
                .any(|known| known.eq_ignore_ascii_case(code))
        };
        self.code
            .as_ref()
            .and_then(ErrorCode::as_text)
            .is_some_and(matches)
            || self.extension_code().is_some_and(matches)
    }

    pub fn has_code(&self, code: i64) -> bool {
        self.code.as_ref().and_then(ErrorCode::as_number) == Some(code)
    }

    pub fn required_credits(&self) -> Option<u64> {
        self.credit_field("required_credits")
    }

    pub fn remaining_credits(&self) -> Option<u64> {
        self.credit_field("remaining_credits")
    }

    fn credit_field(&self, name: &str) -> Option<u64> {
        let value = self.extra.get(name)?;
        value
            .as_u64()
            .or_else(|| value.as_f64().map(|f| f.max(0.0) as u64))
    }
}
