use std::time::Duration;

use config::{Config, ConfigError, File};
use serde::Deserialize;

/// PostgreSQL connection configuration for one handle of a shard.
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Upper bound for any single statement issued through this handle
    #[serde(default = "default_statement_timeout_secs")]
    pub statement_timeout_secs: u64,
}

fn default_pool_size() -> usize {
    16
}

fn default_statement_timeout_secs() -> u64 {
    60
}

impl PostgresSettings {
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }
}

/// Write and read handles of one shard. No failover happens between them.
#[derive(Debug, Deserialize, Clone)]
pub struct ShardSettings {
    pub write: PostgresSettings,
    pub read: PostgresSettings,
}

/// Sharded storage layout.
///
/// Shards are listed in shard-number order starting at 1. The market dataset lives on the
/// shard that `keyspace` routes to.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    #[serde(default = "default_keyspace")]
    pub keyspace: String,
    pub shards: Vec<ShardSettings>,
}

fn default_keyspace() -> String {
    "market".to_string()
}

/// External market data provider.
#[derive(Debug, Deserialize, Clone)]
pub struct MarketDataSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.coinmarketcap.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for MarketDataSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Import cycle pacing and limits.
#[derive(Debug, Deserialize, Clone)]
pub struct ImporterSettings {
    /// Slugs imported on every scheduled cycle in addition to observed assets
    #[serde(default)]
    pub asset_slugs: Vec<String>,
    /// Pause before each price/cap request (provider rate limit)
    #[serde(default = "default_price_cap_delay_secs")]
    pub price_cap_delay_secs: u64,
    /// Pause before each concentration request (provider rate limit)
    #[serde(default = "default_concentration_delay_secs")]
    pub concentration_delay_secs: u64,
    #[serde(default = "default_cycle_timeout_secs")]
    pub cycle_timeout_secs: u64,
}

fn default_price_cap_delay_secs() -> u64 {
    6
}

fn default_concentration_delay_secs() -> u64 {
    12
}

fn default_cycle_timeout_secs() -> u64 {
    3600
}

impl Default for ImporterSettings {
    fn default() -> Self {
        Self {
            asset_slugs: Vec::new(),
            price_cap_delay_secs: default_price_cap_delay_secs(),
            concentration_delay_secs: default_concentration_delay_secs(),
            cycle_timeout_secs: default_cycle_timeout_secs(),
        }
    }
}

/// Intervals of the background jobs.
#[derive(Debug, Deserialize, Clone)]
pub struct CronSettings {
    #[serde(default = "default_import_interval_secs")]
    pub import_interval_secs: u64,
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
    #[serde(default = "default_report_limit")]
    pub report_limit: usize,
}

fn default_import_interval_secs() -> u64 {
    21_600 // 6 hours
}

fn default_report_interval_secs() -> u64 {
    3600
}

fn default_report_limit() -> usize {
    10
}

impl Default for CronSettings {
    fn default() -> Self {
        Self {
            import_interval_secs: default_import_interval_secs(),
            report_interval_secs: default_report_interval_secs(),
            report_limit: default_report_limit(),
        }
    }
}

/// Root application configuration.
///
/// Loaded from `config.yaml` at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub storage: StorageSettings,
    #[serde(default)]
    pub market_data: MarketDataSettings,
    #[serde(default)]
    pub importer: ImporterSettings,
    #[serde(default)]
    pub cron: CronSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config"))
            .build()?;

        s.try_deserialize()
    }

    /// Parses settings from a YAML document instead of `config.yaml`.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(yaml, config::FileFormat::Yaml))
            .build()?
            .try_deserialize()
    }
}
