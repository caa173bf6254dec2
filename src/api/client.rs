//! Authenticated GraphQL client for the ShipHero API
//!
//! Injects a bearer token from the [`TokenRefresher`] and, when the API
//! rejects it, refreshes once and retries exactly once.

use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use super::graphql::{GraphqlError, GraphqlRequest, GraphqlResponse};
use crate::auth::{TokenRefreshError, TokenRefresher};

/// A GraphQL or HTTP call that failed after the permitted auth retry.
/// The remote payload is carried verbatim.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Token(#[from] TokenRefreshError),
    #[error("GraphQL errors: {}", summarize(.errors))]
    Graphql { errors: Vec<GraphqlError> },
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

fn summarize(errors: &[GraphqlError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl RequestError {
    /// HTTP 401 or a GraphQL error coded as unauthenticated.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 401,
            Self::Graphql { errors } => errors.iter().any(GraphqlError::is_unauthenticated),
            _ => false,
        }
    }

    /// The credit-exhaustion error, if this is one.
    pub fn budget_exhausted(&self, code: i64) -> Option<&GraphqlError> {
        match self {
            Self::Graphql { errors } => errors.iter().find(|e| e.has_code(code)),
            _ => None,
        }
    }
}

/// Request Executor: one authenticated call, one transparent retry.
#[derive(Clone)]
pub struct GraphqlClient {
    http: reqwest::Client,
    endpoint: Url,
    tokens: TokenRefresher,
}

impl GraphqlClient {
    pub fn new(http: reqwest::Client, endpoint: Url, tokens: TokenRefresher) -> Self {
        Self {
            http,
            endpoint,
            tokens,
        }
    }

    pub fn tokens(&self) -> &TokenRefresher {
        &self.tokens
    }

    /// Run `query` and return the `data` value.
    ///
    /// Authentication failures trigger one forced refresh and one retry;
    /// every other error, including GraphQL validation errors, is returned
    /// immediately.
    pub async fn execute_raw(&self, query: &str, variables: &Value) -> Result<Value, RequestError> {
        let token = self.tokens.get_valid_access_token().await?;

        match self.send(&token, query, variables).await {
            Err(e) if e.is_auth_failure() => {
                tracing::info!("Access token rejected ({}), refreshing and retrying once", e);
                let token = self.tokens.refresh_after_rejection(&token).await?;
                self.send(&token, query, variables).await
            }
            other => other,
        }
    }

    /// Run `query` and decode `data` into `T`.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: &Value,
    ) -> Result<T, RequestError> {
        let data = self.execute_raw(query, variables).await?;
        serde_json::from_value(data).map_err(|e| RequestError::Decode(e.to_string()))
    }

    async fn send(&self, token: &str, query: &str, variables: &Value) -> Result<Value, RequestError> {
        tracing::debug!("GraphQL POST {}", self.endpoint);

        let resp = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(token)
            .json(&GraphqlRequest { query, variables })
            .send()
            .await
            .map_err(|e| RequestError::Transport(e.to_string()))?;

        check_response(resp).await
    }
}

/// Turn an HTTP response into `data`, or the most specific error available.
async fn check_response(resp: reqwest::Response) -> Result<Value, RequestError> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| RequestError::Transport(e.to_string()))?;

    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(RequestError::Http {
            status: status.as_u16(),
            body,
        });
    }

    let parsed: GraphqlResponse = match serde_json::from_str(&body) {
        Ok(parsed) => parsed,
        Err(e) if status.is_success() => return Err(RequestError::Decode(e.to_string())),
        Err(_) => {
            return Err(RequestError::Http {
                status: status.as_u16(),
                body,
            })
        }
    };

    if let Some(errors) = parsed.errors.filter(|errors| !errors.is_empty()) {
        tracing::warn!("GraphQL returned {} error(s): {}", errors.len(), summarize(&errors));
        return Err(RequestError::Graphql { errors });
    }

    if !status.is_success() {
        return Err(RequestError::Http {
            status: status.as_u16(),
            body,
        });
    }

    parsed
        .data
        .ok_or_else(|| RequestError::Decode("response has no data".to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::{TokenRecord, TokenStore};
    use crate::config::RefreshSettings;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Client against `server` whose store holds a fresh `access` token.
    pub(crate) fn client_for(server: &MockServer, access: &str) -> GraphqlClient {
        let store = TokenStore::in_memory();
        let now = Utc::now();
        store
            .save(&TokenRecord {
                access_token: Some(access.to_string()),
                refresh_token: "rt1".to_string(),
                expires_at: now + Duration::days(20),
                created_at: now,
            })
            .unwrap();
        let http = reqwest::Client::new();
        let tokens = TokenRefresher::new(
            http.clone(),
            Url::parse(&format!("{}/auth/refresh", server.uri())).unwrap(),
            Arc::new(store),
            &RefreshSettings::default(),
        );
        GraphqlClient::new(
            http,
            Url::parse(&format!("{}/graphql", server.uri())).unwrap(),
            tokens,
        )
    }

    async fn mount_refresh(server: &MockServer, access: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": access,
                "expires_in": 2_419_200,
                "token_type": "Bearer",
                "scope": "openid"
            })))
            .expect(times)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_401_refreshes_once_and_retries() {
        let server = MockServer::start().await;
        mount_refresh(&server, "at-new", 1).await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(header("authorization", "Bearer at-old"))
            .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(header("authorization", "Bearer at-new"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "data": { "account": { "request_id": "r1" } } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, "at-old");
        let data = client
            .execute_raw("query { account { request_id } }", &json!({}))
            .await
            .unwrap();
        assert_eq!(data["account"]["request_id"], "r1");
    }

    #[tokio::test]
    async fn test_second_401_is_surfaced() {
        let server = MockServer::start().await;
        mount_refresh(&server, "at-new", 1).await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(401).set_body_string("still expired"))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server, "at-old");
        match client.execute_raw("query { a }", &json!({})).await {
            Err(RequestError::Http { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "still expired");
            }
            other => panic!("expected HTTP 401, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let server = MockServer::start().await;
        mount_refresh(&server, "at-new", 1).await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(header("authorization", "Bearer at-old"))
            .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
            .expect(4)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(header("authorization", "Bearer at-new"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "data": { "account": { "request_id": "r1" } } })),
            )
            .expect(4)
            .mount(&server)
            .await;

        let client = client_for(&server, "at-old");
        let query = "query { account { request_id } }";
        let vars = json!({});
        let (a, b, c, d) = tokio::join!(
            client.execute_raw(query, &vars),
            client.execute_raw(query, &vars),
            client.execute_raw(query, &vars),
            client.execute_raw(query, &vars),
        );
        for data in [a, b, c, d] {
            assert_eq!(data.unwrap()["account"]["request_id"], "r1");
        }
        assert_eq!(
            client.tokens().store().load().unwrap().access_token.as_deref(),
            Some("at-new")
        );
    }

    #[tokio::test]
    async fn test_failed_refresh_during_retry_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string(r#"{"error":"invalid_grant","error_description":"refresh token revoked"}"#),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, "at-old");
        match client.execute_raw("query { a }", &json!({})).await {
            Err(RequestError::Token(TokenRefreshError::Rejected { status, body })) => {
                assert_eq!(status, 400);
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("expected refresh rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unauthenticated_graphql_error_is_retried() {
        let server = MockServer::start().await;
        mount_refresh(&server, "at-new", 1).await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(header("authorization", "Bearer at-old"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": [{ "message": "expired", "extensions": { "code": "UNAUTHENTICATED" } }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(header("authorization", "Bearer at-new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "ok": true } })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, "at-old");
        let data = client.execute_raw("query { ok }", &json!({})).await.unwrap();
        assert_eq!(data["ok"], true);
    }

    #[tokio::test]
    async fn test_validation_error_is_not_retried() {
        let server = MockServer::start().await;
        mount_refresh(&server, "unused", 0).await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": [{ "message": "Cannot query field \"bogus\"", "code": 6 }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, "at-old");
        let err = client.execute_raw("query { bogus }", &json!({})).await.unwrap_err();
        match &err {
            RequestError::Graphql { errors } => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].message, "Cannot query field \"bogus\"");
            }
            other => panic!("expected GraphQL error, got {:?}", other),
        }
        assert!(err.budget_exhausted(30).is_none());
    }

    #[tokio::test]
    async fn test_server_error_keeps_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, "at-old");
        match client.execute_raw("query { a }", &json!({})).await {
            Err(RequestError::Http { status, body }) => {
                assert_eq!(status, 502);
                assert_eq!(body, "bad gateway");
            }
            other => panic!("expected HTTP 502, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_typed_decode() {
        #[derive(Debug, serde::Deserialize)]
        struct Account {
            request_id: String,
        }
        #[derive(Debug, serde::Deserialize)]
        struct Data {
            account: Account,
        }

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "data": { "account": { "request_id": "abc" } } })),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, "at-old");
        let data: Data = client.execute("query { account { request_id } }", &json!({})).await.unwrap();
        assert_eq!(data.account.request_id, "abc");
    }
}
