//! Credit-paced cursor pagination
//!
//! Walks a GraphQL connection one page at a time, sleeping between pages so
//! the account's request budget can regenerate. Running out of budget is
//! not a failure: whatever was gathered so far comes back with
//! `complete == false` and a cursor to resume from.

use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::client::{GraphqlClient, RequestError};
use crate::config::PacingConfig;

/// Anything that can run one GraphQL page request.
pub trait PageSource: Send + Sync {
    fn fetch_page<'a>(
        &'a self,
        query: &'a str,
        variables: &'a Value,
    ) -> BoxFuture<'a, Result<Value, RequestError>>;
}

impl PageSource for GraphqlClient {
    fn fetch_page<'a>(
        &'a self,
        query: &'a str,
        variables: &'a Value,
    ) -> BoxFuture<'a, Result<Value, RequestError>> {
        self.execute_raw(query, variables).boxed()
    }
}

impl<S: PageSource + ?Sized> PageSource for &S {
    fn fetch_page<'a>(
        &'a self,
        query: &'a str,
        variables: &'a Value,
    ) -> BoxFuture<'a, Result<Value, RequestError>> {
        (**self).fetch_page(query, variables)
    }
}

/// A connection query. The query must declare `$first` and `$after`;
/// they are filled in per page.
#[derive(Debug, Clone)]
pub struct PagedQuery {
    pub query: String,
    pub variables: Map<String, Value>,
    /// Field names leading from `data` to the connection object.
    pub connection_path: Vec<String>,
}

impl PagedQuery {
    pub fn new(query: impl Into<String>, connection_path: &[&str]) -> Self {
        Self {
            query: query.into(),
            variables: Map::new(),
            connection_path: connection_path.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_variable(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.variables.insert(name.to_string(), value.into());
        self
    }

    fn variables_for(&self, first: u32, after: Option<&str>) -> Value {
        let mut vars = self.variables.clone();
        vars.insert("first".to_string(), Value::from(first));
        vars.insert(
            "after".to_string(),
            after.map_or(Value::Null, |c| Value::String(c.to_string())),
        );
        Value::Object(vars)
    }

    fn decode_page<T: DeserializeOwned>(&self, data: Value) -> Result<Connection<T>, RequestError> {
        let mut node = data;
        for field in &self.connection_path {
            node = match node {
                Value::Object(mut map) => map.remove(field).unwrap_or(Value::Null),
                _ => Value::Null,
            };
            if node.is_null() {
                return Err(RequestError::Decode(format!(
                    "missing field '{}' in connection path",
                    field
                )));
            }
        }
        serde_json::from_value(node).map_err(|e| RequestError::Decode(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct Connection<T> {
    #[serde(default = "Vec::new")]
    edges: Vec<Edge<T>>,
    #[serde(rename = "pageInfo", default)]
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
struct Edge<T> {
    node: T,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PageInfo {
    #[serde(rename = "hasNextPage", default)]
    has_next_page: bool,
    #[serde(rename = "endCursor", default)]
    end_cursor: Option<String>,
}

/// Progress of one walk. The cursor moves only after a page is merged.
#[derive(Debug, Clone)]
pub struct PaginationState<T> {
    pub cursor: Option<String>,
    pub items: Vec<T>,
    pub pages_fetched: usize,
    pub has_more: bool,
}

impl<T> PaginationState<T> {
    fn starting_at(cursor: Option<String>) -> Self {
        Self {
            cursor,
            items: Vec::new(),
            pages_fetched: 0,
            has_more: true,
        }
    }

    /// Append one page. Returns a stop reason when the remote claims more
    /// pages but gives no cursor that moves the walk forward; the cursor is
    /// then left where it was.
    fn merge(&mut self, page: Connection<T>) -> Option<StopReason> {
        let last_edge_cursor = page.edges.last().and_then(|e| e.cursor.clone());
        let next = page.page_info.end_cursor.or(last_edge_cursor);

        self.items.extend(page.edges.into_iter().map(|e| e.node));
        self.pages_fetched += 1;

        if !page.page_info.has_next_page {
            self.has_more = false;
            if next.is_some() {
                self.cursor = next;
            }
            return None;
        }

        match next {
            None => {
                self.has_more = false;
                Some(StopReason::MissingCursor)
            }
            Some(next) if self.cursor.as_deref() == Some(next.as_str()) => {
                self.has_more = false;
                Some(StopReason::StalledCursor(next))
            }
            Some(next) => {
                self.cursor = Some(next);
                None
            }
        }
    }

    fn finish(self, stop_reason: Option<StopReason>) -> BulkFetch<T> {
        let complete = stop_reason.is_none();
        BulkFetch {
            items: self.items,
            pages_fetched: self.pages_fetched,
            stopped_early: !complete,
            complete,
            next_cursor: if complete { None } else { self.cursor },
            stop_reason,
        }
    }
}

/// Why a walk ended before the last page.
#[derive(Debug, Clone)]
pub enum StopReason {
    BudgetExhausted {
        required: Option<u64>,
        remaining: Option<u64>,
    },
    PageLimit,
    /// `hasNextPage` was set but neither `endCursor` nor an edge cursor was.
    MissingCursor,
    /// The page ended on the cursor it was requested after.
    StalledCursor(String),
    PageError(RequestError),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BudgetExhausted {
                required,
                remaining,
            } => {
                write!(f, "credit budget exhausted")?;
                if let (Some(required), Some(remaining)) = (required, remaining) {
                    write!(f, " (required {}, remaining {})", required, remaining)?;
                }
                Ok(())
            }
            Self::PageLimit => write!(f, "page limit reached"),
            Self::MissingCursor => write!(f, "more pages reported but no cursor given"),
            Self::StalledCursor(cursor) => write!(f, "cursor did not advance past '{}'", cursor),
            Self::PageError(e) => write!(f, "page failed: {}", e),
        }
    }
}

/// Result of a bulk fetch. `complete` is false whenever the walk stopped
/// early; `next_cursor` then points at the first page not yet fetched.
#[derive(Debug, Clone)]
pub struct BulkFetch<T> {
    pub items: Vec<T>,
    pub pages_fetched: usize,
    pub stopped_early: bool,
    pub complete: bool,
    pub next_cursor: Option<String>,
    pub stop_reason: Option<StopReason>,
}

impl<T> BulkFetch<T> {
    /// Replace the items, keeping the walk's outcome.
    pub fn map_items<U>(self, f: impl FnOnce(Vec<T>) -> Vec<U>) -> BulkFetch<U> {
        BulkFetch {
            items: f(self.items),
            pages_fetched: self.pages_fetched,
            stopped_early: self.stopped_early,
            complete: self.complete,
            next_cursor: self.next_cursor,
            stop_reason: self.stop_reason,
        }
    }
}

/// Sequential, paced page walker.
pub struct BulkFetcher<S> {
    source: S,
    pacing: PacingConfig,
}

impl<S: PageSource> BulkFetcher<S> {
    pub fn new(source: S, pacing: PacingConfig) -> Self {
        Self { source, pacing }
    }

    pub fn pacing(&self) -> &PacingConfig {
        &self.pacing
    }

    /// Walk the whole connection from the start.
    pub async fn fetch_all<T: DeserializeOwned>(
        &self,
        query: &PagedQuery,
    ) -> Result<BulkFetch<T>, RequestError> {
        self.fetch_from(query, None).await
    }

    /// Walk the connection starting after `cursor`.
    ///
    /// Only a non-budget failure of the first page is an error. Later
    /// failures, budget exhaustion and the page ceiling all return the
    /// items gathered so far.
    pub async fn fetch_from<T: DeserializeOwned>(
        &self,
        query: &PagedQuery,
        cursor: Option<String>,
    ) -> Result<BulkFetch<T>, RequestError> {
        let wait = self.pacing.wait_between_pages();
        let max_pages = self.pacing.max_pages.max(1);
        let mut state = PaginationState::starting_at(cursor);

        loop {
            if state.pages_fetched >= max_pages {
                tracing::warn!(
                    "Stopping after {} pages ({} items), page limit reached",
                    state.pages_fetched,
                    state.items.len()
                );
                return Ok(state.finish(Some(StopReason::PageLimit)));
            }

            if state.pages_fetched > 0 {
                tracing::debug!("Waiting {:?} for credits to regenerate", wait);
                tokio::time::sleep(wait).await;
            }

            let variables = query.variables_for(self.pacing.page_size, state.cursor.as_deref());
            let page = self
                .source
                .fetch_page(&query.query, &variables)
                .await
                .and_then(|data| query.decode_page::<T>(data));

            match page {
                Ok(page) => {
                    let stalled = state.merge(page);
                    tracing::info!(
                        "Fetched page {} ({} items so far)",
                        state.pages_fetched,
                        state.items.len()
                    );
                    if let Some(reason) = stalled {
                        tracing::warn!(
                            "Stopping after {} pages ({} items): {}",
                            state.pages_fetched,
                            state.items.len(),
                            reason
                        );
                        return Ok(state.finish(Some(reason)));
                    }
                    if !state.has_more {
                        return Ok(state.finish(None));
                    }
                }
                Err(e) => {
                    if let Some(budget) = e.budget_exhausted(self.pacing.budget_error_code) {
                        let reason = StopReason::BudgetExhausted {
                            required: budget.required_credits(),
                            remaining: budget.remaining_credits(),
                        };
                        tracing::warn!(
                            "Stopping after {} pages ({} items): {}",
                            state.pages_fetched,
                            state.items.len(),
                            reason
                        );
                        return Ok(state.finish(Some(reason)));
                    }
                    if state.pages_fetched == 0 {
                        return Err(e);
                    }
                    tracing::warn!(
                        "Page {} failed, returning {} items: {}",
                        state.pages_fetched + 1,
                        state.items.len(),
                        e
                    );
                    return Ok(state.finish(Some(StopReason::PageError(e))));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::graphql::GraphqlError;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sku {
        sku: String,
    }

    /// Replays canned page results and records the variables it was sent.
    #[derive(Default)]
    struct ScriptedSource {
        pages: Mutex<VecDeque<Result<Value, RequestError>>>,
        seen: Mutex<Vec<Value>>,
    }

    impl ScriptedSource {
        fn new(pages: Vec<Result<Value, RequestError>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<Value> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl PageSource for ScriptedSource {
        fn fetch_page<'a>(
            &'a self,
            _query: &'a str,
            variables: &'a Value,
        ) -> BoxFuture<'a, Result<Value, RequestError>> {
            self.seen.lock().unwrap().push(variables.clone());
            let next = self
                .pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(RequestError::Transport("script exhausted".into())));
            async move { next }.boxed()
        }
    }

    fn page(skus: &[&str], end_cursor: &str, has_next: bool) -> Result<Value, RequestError> {
        let edges: Vec<Value> = skus
            .iter()
            .map(|sku| json!({ "node": { "sku": sku }, "cursor": format!("{}-cursor", sku) }))
            .collect();
        Ok(json!({
            "products": {
                "data": {
                    "edges": edges,
                    "pageInfo": { "hasNextPage": has_next, "endCursor": end_cursor }
                }
            }
        }))
    }

    fn budget_error() -> Result<Value, RequestError> {
        let error: GraphqlError = serde_json::from_value(json!({
            "message": "There are not enough credits to perform the requested operation",
            "code": 30,
            "required_credits": 1200,
            "remaining_credits": 310
        }))
        .unwrap();
        Err(RequestError::Graphql {
            errors: vec![error],
        })
    }

    fn products_query() -> PagedQuery {
        PagedQuery::new(
            "query($first: Int, $after: String) { products { data(first: $first, after: $after) { edges { node { sku } cursor } pageInfo { hasNextPage endCursor } } } }",
            &["products", "data"],
        )
    }

    fn skus(items: &[Sku]) -> Vec<&str> {
        items.iter().map(|s| s.sku.as_str()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_pages_are_concatenated_in_order() {
        let source = ScriptedSource::new(vec![
            page(&["A", "B"], "c1", true),
            page(&["C", "D"], "c2", true),
            page(&["E"], "c3", false),
        ]);
        let fetcher = BulkFetcher::new(&source, PacingConfig::default());

        let result: BulkFetch<Sku> = fetcher.fetch_all(&products_query()).await.unwrap();
        assert_eq!(skus(&result.items), vec!["A", "B", "C", "D", "E"]);
        assert_eq!(result.pages_fetched, 3);
        assert!(result.complete);
        assert!(!result.stopped_early);
        assert!(result.next_cursor.is_none());
        assert!(result.stop_reason.is_none());

        let seen = source.seen();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0]["first"], 25);
        assert!(seen[0]["after"].is_null());
        assert_eq!(seen[1]["after"], "c1");
        assert_eq!(seen[2]["after"], "c2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_returns_partial_result() {
        let source = ScriptedSource::new(vec![
            page(&["A", "B"], "c1", true),
            page(&["C", "D"], "c2", true),
            budget_error(),
            page(&["G"], "c4", true),
            page(&["H"], "c5", false),
        ]);
        let fetcher = BulkFetcher::new(&source, PacingConfig::default());

        let result: BulkFetch<Sku> = fetcher.fetch_all(&products_query()).await.unwrap();
        assert_eq!(skus(&result.items), vec!["A", "B", "C", "D"]);
        assert_eq!(result.pages_fetched, 2);
        assert!(result.stopped_early);
        assert!(!result.complete);
        assert_eq!(result.next_cursor.as_deref(), Some("c2"));
        match result.stop_reason {
            Some(StopReason::BudgetExhausted {
                required,
                remaining,
            }) => {
                assert_eq!(required, Some(1200));
                assert_eq!(remaining, Some(310));
            }
            other => panic!("expected budget exhaustion, got {:?}", other),
        }
        assert_eq!(source.seen().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_from_cursor() {
        let source = ScriptedSource::new(vec![page(&["G"], "c4", true), page(&["H"], "c5", false)]);
        let fetcher = BulkFetcher::new(&source, PacingConfig::default());

        let result: BulkFetch<Sku> = fetcher
            .fetch_from(&products_query(), Some("c2".to_string()))
            .await
            .unwrap();
        assert_eq!(skus(&result.items), vec!["G", "H"]);
        assert!(result.complete);
        assert_eq!(source.seen()[0]["after"], "c2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_page_failure_is_an_error() {
        let source = ScriptedSource::new(vec![Err(RequestError::Http {
            status: 500,
            body: "boom".to_string(),
        })]);
        let fetcher = BulkFetcher::new(&source, PacingConfig::default());

        let err = fetcher
            .fetch_all::<Sku>(&products_query())
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Http { status: 500, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_on_first_page_is_empty_partial() {
        let source = ScriptedSource::new(vec![budget_error()]);
        let fetcher = BulkFetcher::new(&source, PacingConfig::default());

        let result: BulkFetch<Sku> = fetcher.fetch_all(&products_query()).await.unwrap();
        assert!(result.items.is_empty());
        assert_eq!(result.pages_fetched, 0);
        assert!(!result.complete);
        assert!(result.next_cursor.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_page_failure_is_partial_success() {
        let source = ScriptedSource::new(vec![
            page(&["A"], "c1", true),
            Err(RequestError::Transport("connection reset".to_string())),
        ]);
        let fetcher = BulkFetcher::new(&source, PacingConfig::default());

        let result: BulkFetch<Sku> = fetcher.fetch_all(&products_query()).await.unwrap();
        assert_eq!(skus(&result.items), vec!["A"]);
        assert!(!result.complete);
        assert!(matches!(result.stop_reason, Some(StopReason::PageError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_limit_stops_walk() {
        let source = ScriptedSource::new(vec![
            page(&["A"], "c1", true),
            page(&["B"], "c2", true),
            page(&["C"], "c3", true),
        ]);
        let pacing = PacingConfig {
            max_pages: 2,
            ..PacingConfig::default()
        };
        let fetcher = BulkFetcher::new(&source, pacing);

        let result: BulkFetch<Sku> = fetcher.fetch_all(&products_query()).await.unwrap();
        assert_eq!(skus(&result.items), vec!["A", "B"]);
        assert!(matches!(result.stop_reason, Some(StopReason::PageLimit)));
        assert_eq!(result.next_cursor.as_deref(), Some("c2"));
        assert_eq!(source.seen().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_between_pages_only() {
        let source = ScriptedSource::new(vec![
            page(&["A"], "c1", true),
            page(&["B"], "c2", true),
            page(&["C"], "c3", false),
        ]);
        let pacing = PacingConfig::default();
        let wait = pacing.wait_between_pages();
        let fetcher = BulkFetcher::new(&source, pacing);

        let started = tokio::time::Instant::now();
        let result: BulkFetch<Sku> = fetcher.fetch_all(&products_query()).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(result.pages_fetched, 3);
        assert!(elapsed >= wait * 2);
        assert!(elapsed < wait * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_page_without_cursor_is_partial() {
        let source = ScriptedSource::new(vec![Ok(json!({
            "products": {
                "data": {
                    "edges": [{ "node": { "sku": "A" } }],
                    "pageInfo": { "hasNextPage": true, "endCursor": null }
                }
            }
        }))]);
        let fetcher = BulkFetcher::new(&source, PacingConfig::default());

        let result: BulkFetch<Sku> = fetcher.fetch_all(&products_query()).await.unwrap();
        assert_eq!(skus(&result.items), vec!["A"]);
        assert!(!result.complete);
        assert!(result.stopped_early);
        assert!(result.next_cursor.is_none());
        assert!(matches!(result.stop_reason, Some(StopReason::MissingCursor)));
        assert_eq!(source.seen().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_end_cursor_stops_walk() {
        let source = ScriptedSource::new(vec![
            page(&["A", "B"], "c1", true),
            page(&["C"], "c1", true),
            page(&["C"], "c1", true),
        ]);
        let fetcher = BulkFetcher::new(&source, PacingConfig::default());

        let result: BulkFetch<Sku> = fetcher.fetch_all(&products_query()).await.unwrap();
        assert_eq!(skus(&result.items), vec!["A", "B", "C"]);
        assert_eq!(result.pages_fetched, 2);
        assert!(!result.complete);
        assert_eq!(result.next_cursor.as_deref(), Some("c1"));
        match result.stop_reason {
            Some(StopReason::StalledCursor(cursor)) => assert_eq!(cursor, "c1"),
            other => panic!("expected stalled cursor, got {:?}", other),
        }
        assert_eq!(source.seen().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_connection_is_decode_error() {
        let source = ScriptedSource::new(vec![Ok(json!({ "products": null }))]);
        let fetcher = BulkFetcher::new(&source, PacingConfig::default());

        let err = fetcher
            .fetch_all::<Sku>(&products_query())
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Decode(_)));
    }

    #[tokio::test]
    async fn test_walks_pages_through_graphql_client() {
        use wiremock::matchers::{body_partial_json, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_partial_json(json!({ "variables": { "after": null } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": page(&["A", "B"], "c1", true).unwrap()
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_partial_json(json!({ "variables": { "after": "c1" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": page(&["C"], "c2", false).unwrap()
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = crate::api::client::tests::client_for(&server, "at-1");
        let pacing = PacingConfig {
            min_wait_ms: 0,
            cost_per_page: 0,
            ..PacingConfig::default()
        };
        let fetcher = BulkFetcher::new(client, pacing);
        assert_eq!(fetcher.pacing().wait_between_pages(), Duration::ZERO);

        let result: BulkFetch<Sku> = fetcher.fetch_all(&products_query()).await.unwrap();
        assert_eq!(skus(&result.items), vec!["A", "B", "C"]);
        assert!(result.complete);
    }
}
