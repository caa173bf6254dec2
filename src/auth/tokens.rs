//! Token record and freshness checks

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The persisted credential set for one session.
///
/// `refresh_token` survives every refresh; only an explicit logout drops it.
/// `access_token` is untrusted until checked against `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: Option<String>,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TokenRecord {
    /// Record produced by a successful exchange: expiry is `now + expires_in`.
    pub fn issued(access_token: String, refresh_token: String, expires_in_secs: u64) -> Self {
        let now = Utc::now();
        let secs = i64::try_from(expires_in_secs)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1000);
        let lifetime = Duration::seconds(secs);
        Self {
            access_token: Some(access_token),
            refresh_token,
            expires_at: now.checked_add_signed(lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC),
            created_at: now,
        }
    }

    /// Record holding only a user-supplied refresh token. It is already stale,
    /// so the first use triggers an exchange.
    pub fn from_refresh_token(refresh_token: String) -> Self {
        let now = Utc::now();
        Self {
            access_token: None,
            refresh_token,
            expires_at: now,
            created_at: now,
        }
    }

    /// The access token, if present and non-empty.
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref().filter(|t| !t.is_empty())
    }

    /// Time left before `expires_at`; negative once expired.
    pub fn time_to_expiry(&self) -> Duration {
        self.expires_at - Utc::now()
    }

    /// True iff `expires_at - now > horizon`.
    pub fn is_fresh(&self, horizon: Duration) -> bool {
        self.time_to_expiry() > horizon
    }
}
