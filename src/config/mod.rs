//! Configuration loading
//!
//! Settings live in `config.toml` under the per-user config directory. Any
//! missing file or section falls back to the defaults below.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use url::Url;

const DEFAULT_GRAPHQL_URL: &str = "https://public-api.shiphero.com/graphql";
const DEFAULT_AUTH_URL: &str = "https://public-api.shiphero.com/auth/refresh";

/// ShipHero reports credit exhaustion with this GraphQL error code.
pub const CREDIT_EXHAUSTED_CODE: i64 = 30;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub endpoints: Endpoints,
    pub refresh: RefreshSettings,
    pub cache: CacheSettings,
    pub pacing: PacingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub graphql_url: Url,
    pub auth_url: Url,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            graphql_url: Url::parse(DEFAULT_GRAPHQL_URL).expect("valid default GraphQL URL"),
            auth_url: Url::parse(DEFAULT_AUTH_URL).expect("valid default auth URL"),
        }
    }
}

/// Token freshness horizons, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshSettings {
    /// An access token closer than this to expiry is not used.
    pub usable_horizon_secs: u64,
    /// Background renewal fires once expiry is closer than this.
    pub renew_horizon_secs: u64,
    /// How often the background task checks the stored record.
    pub check_interval_secs: u64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            usable_horizon_secs: 60 * 60,
            renew_horizon_secs: 24 * 60 * 60,
            check_interval_secs: 60 * 60,
        }
    }
}

impl RefreshSettings {
    pub fn usable_horizon(&self) -> chrono::Duration {
        chrono::Duration::seconds(clamp_secs(self.usable_horizon_secs))
    }

    pub fn renew_horizon(&self) -> chrono::Duration {
        chrono::Duration::seconds(clamp_secs(self.renew_horizon_secs))
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }
}

fn clamp_secs(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1000)
}

/// Per-namespace cache lifetimes, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub inventory_ttl_secs: u64,
    pub warehouses_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            inventory_ttl_secs: 5 * 60,
            warehouses_ttl_secs: 10 * 60,
        }
    }
}

impl CacheSettings {
    pub fn inventory_ttl(&self) -> Duration {
        Duration::from_secs(self.inventory_ttl_secs)
    }

    pub fn warehouses_ttl(&self) -> Duration {
        Duration::from_secs(self.warehouses_ttl_secs)
    }
}

/// Credit budget pacing for paginated fetches.
///
/// The remote gives no live budget telemetry, so these are fixed
/// empirical values: a page of `page_size` items costs roughly
/// `cost_per_page` credits and credits come back at
/// `regeneration_per_second`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub page_size: u32,
    pub cost_per_page: u32,
    pub regeneration_per_second: f64,
    /// Floor for the wait between pages, in milliseconds.
    pub min_wait_ms: u64,
    pub max_pages: usize,
    pub budget_error_code: i64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            page_size: 25,
            cost_per_page: 1200,
            regeneration_per_second: 60.0,
            min_wait_ms: 20_000,
            max_pages: 200,
            budget_error_code: CREDIT_EXHAUSTED_CODE,
        }
    }
}

impl PacingConfig {
    /// Time for the credits spent by one page to regenerate, never below
    /// `min_wait_ms`.
    pub fn wait_between_pages(&self) -> Duration {
        let floor = Duration::from_millis(self.min_wait_ms);
        if !self.regeneration_per_second.is_finite() || self.regeneration_per_second <= 0.0 {
            return floor;
        }
        Duration::try_from_secs_f64(f64::from(self.cost_per_page) / self.regeneration_per_second)
            .map_or(floor, |regen| regen.max(floor))
    }
}

impl Settings {
    /// Get config directory path
    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "warehouse-removal", "warehouse-removal")
            .context("Could not determine config directory")
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Directory holding persisted tokens.
    pub fn data_dir() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.data_dir().to_path_buf())
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;
        Ok(())
    }
}
