//! One client session: token refresher, GraphQL client and services
//! built from [`Settings`], plus the background renewal task.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::{BulkFetcher, GraphqlClient};
use crate::auth::{RenewalHandle, TokenRefresher, TokenStore};
use crate::config::Settings;
use crate::shiphero::{DataService, Orders};

pub struct Session {
    settings: Settings,
    tokens: TokenRefresher,
    client: GraphqlClient,
    data: DataService,
    orders: Orders,
    renewal: Option<RenewalHandle>,
}

impl Session {
    pub fn new(settings: Settings, store: TokenStore) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        let tokens = TokenRefresher::new(
            http.clone(),
            settings.endpoints.auth_url.clone(),
            Arc::new(store),
            &settings.refresh,
        );
        let client = GraphqlClient::new(http, settings.endpoints.graphql_url.clone(), tokens.clone());
        let data = DataService::new(client.clone(), settings.pacing.clone(), settings.cache.clone());
        let orders = Orders::new(client.clone());

        Ok(Self {
            settings,
            tokens,
            client,
            data,
            orders,
            renewal: None,
        })
    }

    /// Session over the token files in the per-user data directory.
    pub fn open(settings: Settings) -> Result<Self> {
        let dir = Settings::data_dir()?;
        Self::new(settings, TokenStore::open(dir))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn tokens(&self) -> &TokenRefresher {
        &self.tokens
    }

    pub fn client(&self) -> &GraphqlClient {
        &self.client
    }

    pub fn data(&self) -> &DataService {
        &self.data
    }

    pub fn orders(&self) -> &Orders {
        &self.orders
    }

    pub fn bulk_fetcher(&self) -> BulkFetcher<GraphqlClient> {
        BulkFetcher::new(self.client.clone(), self.settings.pacing.clone())
    }

    /// Start background renewal if it is not already running.
    pub fn start_renewal(&mut self) {
        if self.renewal.is_none() {
            let every = self.settings.refresh.check_interval();
            tracing::debug!("Starting token renewal every {:?}", every);
            self.renewal = Some(self.tokens.spawn_renewal(every));
        }
    }

    pub fn is_renewing(&self) -> bool {
        self.renewal.as_ref().is_some_and(RenewalHandle::is_running)
    }

    /// Forget stored tokens and cached account data.
    pub fn logout(&self) -> Result<()> {
        self.tokens.logout().context("Failed to clear stored tokens")?;
        self.data.clear_cache();
        Ok(())
    }

    pub async fn shutdown(mut self) {
        if let Some(renewal) = self.renewal.take() {
            renewal.shutdown().await;
        }
    }
}
