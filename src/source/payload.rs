//! Response bodies of the data API and their conversion into domain records.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::db::models::{AssetPlatform, ConcentrationSample, PriceCapSample, TrackedAsset};
use crate::error::{AppError, Result};

pub const SUCCESS_CODE: &str = "0";
pub const SUCCESS_MESSAGE: &str = "SUCCESS";

/// Envelope status block shared by every endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub error_code: String,
    #[serde(default)]
    pub error_message: String,
}

impl Status {
    pub fn check(&self) -> Result<()> {
        if self.error_code != SUCCESS_CODE || self.error_message != SUCCESS_MESSAGE {
            return Err(AppError::internal(format!(
                "provider error {}: {}",
                self.error_code, self.error_message
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub status: Status,
}

// ==================== CHART ====================

#[derive(Debug, Default, Deserialize)]
pub struct ChartData {
    #[serde(default)]
    pub points: HashMap<String, ChartPoint>,
}

/// `v` holds `[price, volume_24h, market_cap, ...]`.
#[derive(Debug, Default, Deserialize)]
pub struct ChartPoint {
    #[serde(default)]
    pub v: Vec<f64>,
}

impl ChartData {
    /// Points keyed by unix seconds, oldest first. Points with fewer than three values are
    /// skipped.
    pub fn into_samples(self, asset_id: i64) -> Result<Vec<PriceCapSample>> {
        let mut samples = Vec::with_capacity(self.points.len());
        for (key, point) in self.points {
            let secs: i64 = key
                .parse()
                .map_err(|_| AppError::data(format!("chart point key {:?} is not a timestamp", key)))?;
            let ts = DateTime::<Utc>::from_timestamp(secs, 0)
                .ok_or_else(|| AppError::data(format!("chart timestamp {} out of range", secs)))?;

            if let [price, daily_volume, cap, ..] = point.v.as_slice() {
                samples.push(PriceCapSample {
                    asset_id,
                    ts,
                    price: *price,
                    daily_volume: *daily_volume,
                    cap: *cap,
                });
            }
        }
        samples.sort_by_key(|s| s.ts);
        Ok(samples)
    }
}

// ==================== ANALYTICS ====================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsData {
    pub historical_concentration: Option<HistoricalConcentration>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalConcentration {
    #[serde(default)]
    pub historical_concentration_details: Vec<ConcentrationPoint>,
}

#[derive(Debug, Deserialize)]
pub struct ConcentrationPoint {
    pub date: String,
    #[serde(default)]
    pub whales: f64,
    #[serde(default)]
    pub investors: f64,
    #[serde(default)]
    pub retail: f64,
}

impl AnalyticsData {
    pub fn into_samples(self, asset_id: i64) -> Result<Vec<ConcentrationSample>> {
        let details = match self.historical_concentration {
            Some(h) => h.historical_concentration_details,
            None => return Ok(Vec::new()),
        };

        details
            .into_iter()
            .map(|p| {
                let day = NaiveDate::parse_from_str(&p.date, "%Y-%m-%d").map_err(|_| {
                    AppError::data(format!("concentration date {:?} is not YYYY-MM-DD", p.date))
                })?;
                Ok(ConcentrationSample {
                    asset_id,
                    day,
                    whales: p.whales,
                    investors: p.investors,
                    retail: p.retail,
                })
            })
            .collect()
    }
}

// ==================== DETAIL ====================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailData {
    pub id: i64,
    pub symbol: String,
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub date_added: Option<DateTime<Utc>>,
    #[serde(default)]
    pub statistics: DetailStatistics,
    #[serde(default)]
    pub platform: Option<DetailPlatform>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetailStatistics {
    pub price: f64,
    pub circulating_supply: f64,
    pub self_reported_circulating_supply: f64,
    pub total_supply: f64,
    pub max_supply: Option<f64>,
    pub rank: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetailPlatform {
    pub id: i64,
    pub symbol: String,
    pub slug: String,
    pub name: String,
    pub token_address: String,
}

impl From<DetailData> for TrackedAsset {
    fn from(d: DetailData) -> Self {
        TrackedAsset {
            id: d.id,
            symbol: d.symbol,
            slug: d.slug,
            name: d.name,
            observed: false,
            circulating_supply: d.statistics.circulating_supply,
            self_reported_circulating_supply: d.statistics.self_reported_circulating_supply,
            total_supply: d.statistics.total_supply,
            max_supply: d.statistics.max_supply,
            latest_price: d.statistics.price,
            rank: d.statistics.rank,
            added_at: d.date_added,
            platform: d.platform.map(|p| AssetPlatform {
                id: p.id,
                symbol: p.symbol,
                slug: p.slug,
                name: p.name,
                token_address: p.token_address,
            }),
        }
    }
}

/// Decodes an envelope, checks its status, and returns its data block if present.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<Option<T>> {
    let envelope: Envelope<T> = serde_json::from_slice(body)?;
    envelope.status.check()?;
    Ok(envelope.data)
}
