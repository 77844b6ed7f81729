//! External market data provider.
//!
//! The importer only talks to [`MarketDataSource`]; [`CmcClient`] is the HTTP implementation.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::db::models::{ConcentrationSample, PriceCapSample, TrackedAsset};
use crate::error::{AppError, Result};

pub mod client;
pub mod payload;

pub use client::CmcClient;

/// History range requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeWindow {
    Month,
    Year,
    All,
}

impl TimeWindow {
    /// Range label of the chart endpoint.
    pub fn label(&self) -> &'static str {
        match self {
            TimeWindow::Month => "1M",
            TimeWindow::Year => "1Y",
            TimeWindow::All => "All",
        }
    }

    /// Range label of the analytics endpoint.
    pub fn analytics_label(&self) -> &'static str {
        match self {
            TimeWindow::Month => "month1",
            TimeWindow::Year => "year1",
            TimeWindow::All => "all",
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TimeWindow {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1M" | "month1" => Ok(TimeWindow::Month),
            "1Y" | "year1" => Ok(TimeWindow::Year),
            "All" | "all" => Ok(TimeWindow::All),
            other => Err(AppError::bad_request(format!("unknown time window {:?}", other))),
        }
    }
}

/// Provider of asset history and metadata.
///
/// Unknown assets are reported as `NotFound`, transport and provider failures as `Internal`,
/// and undecodable payloads as `Data`. A window with no points is an empty `Vec`.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch_price_cap(&self, asset_id: i64, window: TimeWindow)
        -> Result<Vec<PriceCapSample>>;

    async fn fetch_concentration(
        &self,
        asset_id: i64,
        window: TimeWindow,
    ) -> Result<Vec<ConcentrationSample>>;

    /// Looks an asset up by slug. The returned asset is not yet observed.
    async fn fetch_asset_metadata(&self, slug: &str) -> Result<TrackedAsset>;
}
