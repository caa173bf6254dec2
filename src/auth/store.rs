//! Layered token persistence
//!
//! A [`TokenStore`] owns an ordered list of [`TokenBackend`]s. Reads walk the
//! list and take the first structurally valid record; writes go to every
//! backend, but only the first (primary) one has to succeed.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tokens::TokenRecord;

const PRIMARY_KEY: &str = "shiphero_tokens";
const LEGACY_ACCESS_KEY: &str = "shiphero_access_token";
const LEGACY_REFRESH_KEY: &str = "shiphero_refresh_token";
const LEGACY_EXPIRES_KEY: &str = "shiphero_token_expires_at";
const COOKIE_KEY: &str = "shiphero_refresh";
const DATABASE_KEY: &str = "current";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize storage: {0}")]
    Serialize(String),
    /// Persisted data exists but fails structural validation. Treated as
    /// "nothing found" by [`TokenStore::load`].
    #[error("malformed persisted token state: {0}")]
    MalformedPersistedState(String),
}

/// Opaque durable string storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-process map; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(key);
        Ok(())
    }
}

/// Flat string table kept in a TOML file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read_table(&self) -> Result<BTreeMap<String, String>, StorageError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(toml::from_str(&content)?)
    }

    fn write_table(&self, table: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content =
            toml::to_string_pretty(table).map_err(|e| StorageError::Serialize(e.to_string()))?;

        // Readers see the old table or the new one, never a truncated file.
        let staging = self.staging_path();
        fs::write(&staging, content)?;

        // Contains tokens
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&staging, fs::Permissions::from_mode(0o600))?;
        }

        fs::rename(&staging, &self.path)?;
        Ok(())
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.read_table()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut table = self.read_table()?;
        table.insert(key.to_string(), value.to_string());
        self.write_table(&table)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut table = self.read_table()?;
        if table.remove(key).is_some() {
            self.write_table(&table)?;
        }
        Ok(())
    }
}

/// One persistence strategy for the token record.
pub trait TokenBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn get(&self) -> Result<Option<TokenRecord>, StorageError>;
    fn set(&self, record: &TokenRecord) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

/// Wire shape shared by the JSON-encoded backends.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedRecord {
    #[serde(default)]
    access_token: Option<String>,
    refresh_token: String,
    expires_at: String,
    #[serde(default)]
    created_at: Option<String>,
}

impl PersistedRecord {
    fn from_record(record: &TokenRecord) -> Self {
        Self {
            access_token: record.access_token.clone(),
            refresh_token: record.refresh_token.clone(),
            expires_at: record.expires_at.to_rfc3339(),
            created_at: Some(record.created_at.to_rfc3339()),
        }
    }

    fn into_record(self) -> Result<TokenRecord, StorageError> {
        validate_record(
            self.access_token,
            self.refresh_token,
            &self.expires_at,
            self.created_at.as_deref(),
        )
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::MalformedPersistedState(format!("bad timestamp {value:?}: {e}")))
}

fn validate_record(
    access_token: Option<String>,
    refresh_token: String,
    expires_at: &str,
    created_at: Option<&str>,
) -> Result<TokenRecord, StorageError> {
    if refresh_token.trim().is_empty() {
        return Err(StorageError::MalformedPersistedState(
            "empty refresh token".to_string(),
        ));
    }
    let expires_at = parse_timestamp(expires_at)?;
    let created_at = match created_at {
        Some(value) => parse_timestamp(value)?,
        None => Utc::now(),
    };
    Ok(TokenRecord {
        access_token: access_token.filter(|t| !t.is_empty()),
        refresh_token,
        expires_at,
        created_at,
    })
}

fn decode_json<T: for<'de> Deserialize<'de>>(raw: &str) -> Result<T, StorageError> {
    serde_json::from_str(raw).map_err(|e| StorageError::MalformedPersistedState(e.to_string()))
}

fn encode_json<T: Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::Serialize(e.to_string()))
}

/// Full record as one JSON value under a canonical key.
pub struct PrimaryRecord {
    kv: Arc<dyn KeyValueStore>,
}

impl PrimaryRecord {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }
}

impl TokenBackend for PrimaryRecord {
    fn name(&self) -> &'static str {
        "primary"
    }

    fn get(&self) -> Result<Option<TokenRecord>, StorageError> {
        match self.kv.get(PRIMARY_KEY)? {
            Some(raw) => decode_json::<PersistedRecord>(&raw)?.into_record().map(Some),
            None => Ok(None),
        }
    }

    fn set(&self, record: &TokenRecord) -> Result<(), StorageError> {
        self.kv
            .set(PRIMARY_KEY, &encode_json(&PersistedRecord::from_record(record))?)
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.kv.remove(PRIMARY_KEY)
    }
}

/// Older format: one flat key per field. All three must be present.
pub struct LegacyFlatKeys {
    kv: Arc<dyn KeyValueStore>,
}

impl LegacyFlatKeys {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }
}

impl TokenBackend for LegacyFlatKeys {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn get(&self) -> Result<Option<TokenRecord>, StorageError> {
        let access = self.kv.get(LEGACY_ACCESS_KEY)?;
        let refresh = self.kv.get(LEGACY_REFRESH_KEY)?;
        let expires = self.kv.get(LEGACY_EXPIRES_KEY)?;
        match (access, refresh, expires) {
            (Some(access), Some(refresh), Some(expires)) if !access.is_empty() => {
                validate_record(Some(access), refresh, &expires, None).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn set(&self, record: &TokenRecord) -> Result<(), StorageError> {
        self.kv.set(
            LEGACY_ACCESS_KEY,
            record.access_token.as_deref().unwrap_or_default(),
        )?;
        self.kv.set(LEGACY_REFRESH_KEY, &record.refresh_token)?;
        self.kv
            .set(LEGACY_EXPIRES_KEY, &record.expires_at.to_rfc3339())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.kv.remove(LEGACY_ACCESS_KEY)?;
        self.kv.remove(LEGACY_REFRESH_KEY)?;
        self.kv.remove(LEGACY_EXPIRES_KEY)
    }
}

/// Cookie-style mirror: base64 JSON without the access token.
pub struct CookieMirror {
    kv: Arc<dyn KeyValueStore>,
}

impl CookieMirror {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }
}

impl TokenBackend for CookieMirror {
    fn name(&self) -> &'static str {
        "cookie"
    }

    fn get(&self) -> Result<Option<TokenRecord>, StorageError> {
        let Some(raw) = self.kv.get(COOKIE_KEY)? else {
            return Ok(None);
        };
        let bytes = STANDARD
            .decode(raw.trim())
            .map_err(|e| StorageError::MalformedPersistedState(e.to_string()))?;
        let json = String::from_utf8(bytes)
            .map_err(|e| StorageError::MalformedPersistedState(e.to_string()))?;
        let mut persisted: PersistedRecord = decode_json(&json)?;
        persisted.access_token = None;
        persisted.into_record().map(Some)
    }

    fn set(&self, record: &TokenRecord) -> Result<(), StorageError> {
        let mut persisted = PersistedRecord::from_record(record);
        persisted.access_token = None;
        let encoded = STANDARD.encode(encode_json(&persisted)?);
        self.kv.set(COOKIE_KEY, &encoded)
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.kv.remove(COOKIE_KEY)
    }
}

/// Full record kept in a separate embedded store.
pub struct DatabaseMirror {
    kv: Arc<dyn KeyValueStore>,
}

impl DatabaseMirror {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }
}

impl TokenBackend for DatabaseMirror {
    fn name(&self) -> &'static str {
        "database"
    }

    fn get(&self) -> Result<Option<TokenRecord>, StorageError> {
        match self.kv.get(DATABASE_KEY)? {
            Some(raw) => decode_json::<PersistedRecord>(&raw)?.into_record().map(Some),
            None => Ok(None),
        }
    }

    fn set(&self, record: &TokenRecord) -> Result<(), StorageError> {
        self.kv
            .set(DATABASE_KEY, &encode_json(&PersistedRecord::from_record(record))?)
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.kv.remove(DATABASE_KEY)
    }
}

/// Ordered set of backends holding the session's [`TokenRecord`].
pub struct TokenStore {
    backends: Vec<Box<dyn TokenBackend>>,
}

impl TokenStore {
    pub fn new(backends: Vec<Box<dyn TokenBackend>>) -> Self {
        Self { backends }
    }

    /// Standard layering: primary record, legacy flat keys and cookie mirror
    /// share `kv`; the database mirror lives in `database`.
    pub fn layered(kv: Arc<dyn KeyValueStore>, database: Arc<dyn KeyValueStore>) -> Self {
        Self::new(vec![
            Box::new(PrimaryRecord::new(kv.clone())),
            Box::new(LegacyFlatKeys::new(kv.clone())),
            Box::new(CookieMirror::new(kv)),
            Box::new(DatabaseMirror::new(database)),
        ])
    }

    pub fn in_memory() -> Self {
        Self::layered(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    /// File-backed layering under `dir` (`tokens.toml` and `tokens-db.toml`).
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self::layered(
            Arc::new(FileStore::new(dir.join("tokens.toml"))),
            Arc::new(FileStore::new(dir.join("tokens-db.toml"))),
        )
    }

    /// Write the record to every backend. Only the primary must succeed.
    pub fn save(&self, record: &TokenRecord) -> Result<(), StorageError> {
        let mut backends = self.backends.iter();
        if let Some(primary) = backends.next() {
            primary.set(record)?;
        }
        for mirror in backends {
            if let Err(e) = mirror.set(record) {
                tracing::warn!("Token mirror '{}' write failed: {}", mirror.name(), e);
            }
        }
        Ok(())
    }

    /// First structurally valid record, in backend order.
    pub fn load(&self) -> Option<TokenRecord> {
        for backend in &self.backends {
            match backend.get() {
                Ok(Some(record)) => {
                    tracing::debug!("Loaded tokens from '{}' backend", backend.name());
                    return Some(record);
                }
                Ok(None) => {}
                Err(StorageError::MalformedPersistedState(reason)) => {
                    tracing::debug!("Ignoring '{}' token state: {}", backend.name(), reason);
                }
                Err(e) => {
                    tracing::warn!("Token backend '{}' read failed: {}", backend.name(), e);
                }
            }
        }
        None
    }

    /// Remove the record everywhere. Used only on explicit logout.
    pub fn clear(&self) -> Result<(), StorageError> {
        let mut first_error = None;
        for backend in &self.backends {
            if let Err(e) = backend.clear() {
                tracing::warn!("Token backend '{}' clear failed: {}", backend.name(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
