//! Refresh-token exchange with single-flight de-duplication
//!
//! Some auth servers invalidate a refresh token that is presented twice in
//! quick succession, so concurrent callers must share one exchange. The
//! pending exchange is kept as a [`Shared`] future in a slot; callers that
//! find the slot occupied await the same future instead of starting another.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use url::Url;

use super::store::TokenStore;
use super::tokens::TokenRecord;
use crate::config::RefreshSettings;

/// ShipHero access tokens last 28 days when the server omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 28 * 24 * 60 * 60;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TokenRefreshError {
    #[error("no refresh token stored; log in first")]
    NoRefreshToken,
    #[error("auth endpoint returned HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("auth request failed: {0}")]
    Transport(String),
    #[error("auth response has no access_token")]
    MissingAccessToken,
    #[error("invalid auth response: {0}")]
    InvalidResponse(String),
    #[error("failed to persist tokens: {0}")]
    Storage(String),
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Response from the auth endpoint. `token_type` and `scope` are not stored.
#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub access_token: Option<String>,
    pub expires_in: Option<u64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

type PendingRefresh = Shared<BoxFuture<'static, Result<TokenRecord, TokenRefreshError>>>;

/// Snapshot of the stored credentials, computed without any network call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenStatus {
    pub has_refresh_token: bool,
    pub has_access_token: bool,
    pub expires_at: Option<DateTime<Utc>>,
    /// Access token present and outside the usable horizon.
    pub usable: bool,
    /// Background renewal would fire on its next check.
    pub renewal_due: bool,
}

/// Supplies valid access tokens to every request path of one session.
///
/// Cheap to clone; clones share the same in-flight slot and store.
#[derive(Clone)]
pub struct TokenRefresher {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    auth_url: Url,
    store: Arc<TokenStore>,
    usable_horizon: chrono::Duration,
    renew_horizon: chrono::Duration,
    in_flight: Mutex<Option<PendingRefresh>>,
}

impl TokenRefresher {
    pub fn new(
        http: reqwest::Client,
        auth_url: Url,
        store: Arc<TokenStore>,
        settings: &RefreshSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                auth_url,
                store,
                usable_horizon: settings.usable_horizon(),
                renew_horizon: settings.renew_horizon(),
                in_flight: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    /// Stored access token if it is outside the usable horizon, otherwise
    /// the result of [`Self::refresh`].
    pub async fn get_valid_access_token(&self) -> Result<String, TokenRefreshError> {
        if let Some(record) = self.inner.store.load() {
            if let Some(token) = record.access_token() {
                if record.is_fresh(self.inner.usable_horizon) {
                    return Ok(token.to_string());
                }
            }
            tracing::debug!("Access token missing or near expiry");
        }

        let record = self.refresh().await?;
        record
            .access_token
            .ok_or(TokenRefreshError::MissingAccessToken)
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// Concurrent callers receive the result of a single exchange. On
    /// failure the stored record is left untouched.
    pub async fn refresh(&self) -> Result<TokenRecord, TokenRefreshError> {
        let pending = {
            let mut slot = self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some(pending) => {
                    tracing::debug!("Joining in-flight token refresh");
                    pending.clone()
                }
                None => {
                    let inner = self.inner.clone();
                    let pending = async move { inner.exchange().await }.boxed().shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };

        let result = pending.clone().await;

        let mut slot = self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&pending)) {
            *slot = None;
        }

        result
    }

    /// Replacement for an access token the API just rejected. If another
    /// caller already stored a different usable token, that one is returned;
    /// otherwise a refresh is forced.
    pub async fn refresh_after_rejection(
        &self,
        rejected: &str,
    ) -> Result<String, TokenRefreshError> {
        if let Some(record) = self.inner.store.load() {
            if let Some(token) = record.access_token() {
                if token != rejected && record.is_fresh(self.inner.usable_horizon) {
                    return Ok(token.to_string());
                }
            }
        }
        let record = self.refresh().await?;
        record
            .access_token
            .ok_or(TokenRefreshError::MissingAccessToken)
    }

    /// Store a user-supplied refresh token and exchange it right away.
    pub async fn login(&self, refresh_token: &str) -> Result<TokenRecord, TokenRefreshError> {
        let refresh_token = refresh_token.trim();
        if refresh_token.is_empty() {
            return Err(TokenRefreshError::NoRefreshToken);
        }
        self.inner
            .store
            .save(&TokenRecord::from_refresh_token(refresh_token.to_string()))
            .map_err(|e| TokenRefreshError::Storage(e.to_string()))?;
        self.refresh().await
    }

    /// Drop every stored credential, including the refresh token.
    pub fn logout(&self) -> Result<(), TokenRefreshError> {
        self.inner
            .store
            .clear()
            .map_err(|e| TokenRefreshError::Storage(e.to_string()))?;
        tracing::info!("Stored tokens cleared");
        Ok(())
    }

    pub fn status(&self) -> TokenStatus {
        match self.inner.store.load() {
            Some(record) => TokenStatus {
                has_refresh_token: true,
                has_access_token: record.access_token().is_some(),
                expires_at: Some(record.expires_at),
                usable: record.access_token().is_some()
                    && record.is_fresh(self.inner.usable_horizon),
                renewal_due: !record.is_fresh(self.inner.renew_horizon),
            },
            None => TokenStatus {
                has_refresh_token: false,
                has_access_token: false,
                expires_at: None,
                usable: false,
                renewal_due: false,
            },
        }
    }

    /// Refresh if the stored record is inside the renewal horizon.
    /// Returns whether a refresh ran.
    pub async fn renew_if_due(&self) -> Result<bool, TokenRefreshError> {
        let Some(record) = self.inner.store.load() else {
            return Ok(false);
        };
        if record.is_fresh(self.inner.renew_horizon) {
            return Ok(false);
        }
        tracing::info!(
            "Token expires at {}, renewing in background",
            record.expires_at
        );
        self.refresh().await?;
        Ok(true)
    }

    /// Start the background renewal task. It checks once immediately and
    /// then every `every`, until the returned handle is shut down or dropped.
    pub fn spawn_renewal(&self, every: Duration) -> RenewalHandle {
        let refresher = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = refresher.renew_if_due().await {
                    tracing::warn!("Background token renewal failed: {}", e);
                }
            }
        });
        RenewalHandle {
            handle: Some(handle),
        }
    }
}

impl Inner {
    async fn exchange(&self) -> Result<TokenRecord, TokenRefreshError> {
        let current = self
            .store
            .load()
            .ok_or(TokenRefreshError::NoRefreshToken)?;

        tracing::info!("Refreshing access token...");

        let resp = self
            .http
            .post(self.auth_url.clone())
            .json(&RefreshRequest {
                refresh_token: &current.refresh_token,
            })
            .send()
            .await
            .map_err(|e| TokenRefreshError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!("Token refresh rejected (HTTP {})", status.as_u16());
            return Err(TokenRefreshError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let auth: AuthResponse = resp
            .json()
            .await
            .map_err(|e| TokenRefreshError::InvalidResponse(e.to_string()))?;
        let access_token = auth
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(TokenRefreshError::MissingAccessToken)?;

        let record = TokenRecord::issued(
            access_token,
            current.refresh_token,
            auth.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS),
        );
        self.store
            .save(&record)
            .map_err(|e| TokenRefreshError::Storage(e.to_string()))?;

        tracing::info!("Token refresh complete, expires at {}", record.expires_at);
        Ok(record)
    }
}

/// Owns the background renewal task.
pub struct RenewalHandle {
    handle: Option<JoinHandle<()>>,
}

impl RenewalHandle {
    /// Stop the task and wait for it to wind down.
    pub async fn shutdown(mut self) {
        if let Some(h) = self.handle.take() {
            h.abort();
            let _ = h.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for RenewalHandle {
    fn drop(&mut self) {
        if let Some(h) = self.handle.take() {
            h.abort();
        }
    }
}
