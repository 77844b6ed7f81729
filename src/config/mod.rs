mod config;

pub use self::config::{
    CronSettings, ImporterSettings, MarketDataSettings, PostgresSettings, Settings, ShardSettings,
    StorageSettings,
};
