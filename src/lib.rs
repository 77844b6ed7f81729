pub mod cluster;
pub mod config;
pub mod cron;
pub mod db;
pub mod error;
pub mod import;
pub mod report;
pub mod service;
pub mod source;

pub use cluster::{Cluster, ReplicaSet, ShardKey, ShardRouter};
pub use self::config::Settings;
pub use cron::CronScheduler;
pub use db::PostgresClient;
pub use error::{AppError, ErrorKind, Result};
pub use import::Importer;
pub use service::MarketService;
pub use source::{CmcClient, MarketDataSource, TimeWindow};
