//! TTL response cache with single-flight fetches
//!
//! Each key holds the last successful result and, while a fetch runs, the
//! shared pending fetch. Callers arriving during a fetch join it instead of
//! starting another. A failed fetch never replaces good data.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;

/// Cache key: resource namespace plus account or query identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub namespace: String,
    pub identifier: String,
}

impl CacheKey {
    pub fn new(namespace: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            identifier: identifier.into(),
        }
    }

    /// Key for a namespace with no narrower identifier.
    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self::new(namespace, "default")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.namespace, self.identifier)
    }
}

type PendingFetch<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct CacheEntry<T, E> {
    data: T,
    /// `None` until the first successful fetch.
    fetched_at: Option<Instant>,
    ttl: Duration,
    in_flight: Option<PendingFetch<T, E>>,
}

impl<T: Default, E> CacheEntry<T, E> {
    fn empty(ttl: Duration) -> Self {
        Self {
            data: T::default(),
            fetched_at: None,
            ttl,
            in_flight: None,
        }
    }

    fn is_fresh(&self, now: Instant) -> bool {
        self.fetched_at
            .is_some_and(|at| now.saturating_duration_since(at) < self.ttl)
    }

    /// Idle entries past twice their TTL, or never filled, can go.
    fn is_sweepable(&self, now: Instant) -> bool {
        if self.in_flight.is_some() {
            return false;
        }
        match self.fetched_at {
            Some(at) => now.saturating_duration_since(at) > self.ttl * 2,
            None => true,
        }
    }
}

/// Age report for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryAge {
    pub key: String,
    pub age: Option<Duration>,
    pub in_flight: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub ages: Vec<EntryAge>,
}

/// Memoizes expensive fetches of `T`, keyed by [`CacheKey`].
pub struct ResponseCache<T, E> {
    entries: Mutex<HashMap<CacheKey, CacheEntry<T, E>>>,
}

impl<T, E> Default for ResponseCache<T, E> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T, E> ResponseCache<T, E>
where
    T: Clone + Default + Send + Sync + 'static,
    E: Clone + fmt::Display + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value for `key` if younger than `ttl`, else the result of
    /// `fetch` (shared with any concurrent caller for the same key).
    pub async fn get<F, Fut>(&self, key: &CacheKey, ttl: Duration, fetch: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.get_with(key, ttl, false, fetch).await
    }

    /// Like [`Self::get`]; `force` skips the freshness check.
    ///
    /// `fetch` is only called to build the future and must not touch this
    /// cache. When the fetch fails and the key holds earlier good data, that
    /// data is returned; the error surfaces only when there is nothing to
    /// fall back on.
    pub async fn get_with<F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        force: bool,
        fetch: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let pending = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::empty(ttl));
            entry.ttl = ttl;

            if !force && entry.is_fresh(Instant::now()) {
                tracing::debug!("Cache hit for {}", key);
                return Ok(entry.data.clone());
            }

            match entry.in_flight.as_ref() {
                Some(pending) => {
                    tracing::debug!("Joining in-flight fetch for {}", key);
                    pending.clone()
                }
                None => {
                    tracing::debug!("Fetching {}", key);
                    let pending = fetch().boxed().shared();
                    entry.in_flight = Some(pending.clone());
                    pending
                }
            }
        };

        let result = pending.clone().await;

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let owns_slot = entries.get(key).is_some_and(|entry| {
            entry
                .in_flight
                .as_ref()
                .is_some_and(|current| current.ptr_eq(&pending))
        });

        if owns_slot {
            let now = Instant::now();
            let mut remove = false;
            if let Some(entry) = entries.get_mut(key) {
                entry.in_flight = None;
                match &result {
                    Ok(data) => {
                        entry.data = data.clone();
                        entry.fetched_at = Some(now);
                    }
                    Err(e) => {
                        tracing::warn!("Fetch for {} failed: {}", key, e);
                        remove = entry.fetched_at.is_none();
                    }
                }
            }
            if remove {
                entries.remove(key);
            }
            if result.is_ok() {
                entries.retain(|_, entry| !entry.is_sweepable(now));
            }
        }

        match result {
            Ok(data) => Ok(data),
            Err(e) => match entries.get(key) {
                Some(entry) if entry.fetched_at.is_some() => {
                    tracing::warn!("Serving last good data for {}", key);
                    Ok(entry.data.clone())
                }
                _ => Err(e),
            },
        }
    }

    /// Drop idle entries older than twice their TTL. Returns how many went.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_sweepable(now));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut ages: Vec<EntryAge> = entries
            .iter()
            .map(|(key, entry)| EntryAge {
                key: key.to_string(),
                age: entry.fetched_at.map(|at| now.saturating_duration_since(at)),
                in_flight: entry.in_flight.is_some(),
            })
            .collect();
        ages.sort_by(|a, b| a.key.cmp(&b.key));
        CacheStats {
            entries: entries.len(),
            ages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    type Cache = ResponseCache<Vec<String>, String>;

    const TTL: Duration = Duration::from_secs(5 * 60);

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        value: &str,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<Vec<String>, String>> {
        let calls = calls.clone();
        let value = value.to_string();
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(vec![value])
            }
            .boxed()
        }
    }

    fn failing_fetch(
        calls: &Arc<AtomicUsize>,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<Vec<String>, String>> {
        let calls = calls.clone();
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Err("upstream unavailable".to_string())
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_cold_gets_share_one_fetch() {
        let cache = Cache::new();
        let key = CacheKey::namespace("inventory");
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            cache.get(&key, TTL, counting_fetch(&calls, "D1")),
            cache.get(&key, TTL, counting_fetch(&calls, "other")),
        );
        assert_eq!(a.unwrap(), vec!["D1".to_string()]);
        assert_eq!(b.unwrap(), vec!["D1".to_string()]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let hit = cache.get(&key, TTL, counting_fetch(&calls, "D2")).await;
        assert_eq!(hit.unwrap(), vec!["D1".to_string()]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        let refreshed = cache.get(&key, TTL, counting_fetch(&calls, "D2")).await;
        assert_eq!(refreshed.unwrap(), vec!["D2".to_string()]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_last_good_data() {
        let cache = Cache::new();
        let key = CacheKey::namespace("inventory");
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get(&key, TTL, counting_fetch(&calls, "D1"))
            .await
            .unwrap();
        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        let after_failure = cache.get(&key, TTL, failing_fetch(&calls)).await;
        assert_eq!(after_failure.unwrap(), vec!["D1".to_string()]);

        let forced = cache.get_with(&key, TTL, true, failing_fetch(&calls)).await;
        assert_eq!(forced.unwrap(), vec!["D1".to_string()]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert!(!stats.ages[0].in_flight);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_failure_reaches_every_joined_caller() {
        let cache = Cache::new();
        let key = CacheKey::new("warehouses", "acct-1");
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            cache.get(&key, TTL, failing_fetch(&calls)),
            cache.get(&key, TTL, failing_fetch(&calls)),
        );
        assert_eq!(a.unwrap_err(), "upstream unavailable");
        assert_eq!(b.unwrap_err(), "upstream unavailable");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_bypasses_fresh_entry() {
        let cache = Cache::new();
        let key = CacheKey::namespace("inventory");
        let calls = Arc::new(AtomicUsize::new(0));

        cache.get(&key, TTL, counting_fetch(&calls, "D1")).await.unwrap();
        let forced = cache
            .get_with(&key, TTL, true, counting_fetch(&calls, "D2"))
            .await
            .unwrap();
        assert_eq!(forced, vec!["D2".to_string()]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entries_are_swept() {
        let cache = Cache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let short = Duration::from_secs(60);
        let old_key = CacheKey::namespace("inventory");
        let new_key = CacheKey::namespace("warehouses");

        cache.get(&old_key, short, counting_fetch(&calls, "old")).await.unwrap();
        tokio::time::advance(short * 2 + Duration::from_secs(1)).await;

        cache.get(&new_key, TTL, counting_fetch(&calls, "new")).await.unwrap();
        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.ages[0].key, "warehouses_default");

        tokio::time::advance(TTL * 2 + Duration::from_secs(1)).await;
        assert_eq!(cache.sweep(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_empties_cache() {
        let cache = Cache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::namespace("inventory");
        cache.get(&key, TTL, counting_fetch(&calls, "D1")).await.unwrap();
        cache.clear();
        assert_eq!(cache.stats().entries, 0);

        cache.get(&key, TTL, counting_fetch(&calls, "D2")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
