use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::upsert::{UpsertRecord, UpsertTarget};
use crate::db::value::{SqlRow, SqlValue};
use crate::error::Result;

/// Chain the asset lives on when it is a token rather than a native coin.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AssetPlatform {
    pub id: i64,
    pub symbol: String,
    pub slug: String,
    pub name: String,
    pub token_address: String,
}

/// Asset tracked by the importer (PostgreSQL)
///
/// Primary Key: id
/// Unique: slug
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedAsset {
    pub id: i64,
    pub symbol: String,
    pub slug: String,
    pub name: String,

    /// Included in scheduled imports and reports
    pub observed: bool,

    // Supply and market state as of the last import
    pub circulating_supply: f64,
    pub self_reported_circulating_supply: f64,
    pub total_supply: f64,
    pub max_supply: Option<f64>,
    pub latest_price: f64,
    pub rank: i64,

    pub added_at: Option<DateTime<Utc>>,
    pub platform: Option<AssetPlatform>,
}

impl TrackedAsset {
    pub const TARGET: UpsertTarget = UpsertTarget {
        table: "market.assets",
        key_columns: &["id"],
        columns: &[
            "id",
            "symbol",
            "slug",
            "name",
            "observed",
            "circulating_supply",
            "self_reported_circulating_supply",
            "total_supply",
            "max_supply",
            "latest_price",
            "rank",
            "added_at",
            "platform",
        ],
        on_conflict_do_nothing: false,
    };

    pub fn from_row(row: &SqlRow) -> Result<Self> {
        let platform = match row.get_opt_json("platform")? {
            Some(value) => Some(serde_json::from_value(value)?),
            None => None,
        };

        Ok(Self {
            id: row.get_i64("id")?,
            symbol: row.get_text("symbol")?,
            slug: row.get_text("slug")?,
            name: row.get_text("name")?,
            observed: row.get_bool("observed")?,
            circulating_supply: row.get_f64("circulating_supply")?,
            self_reported_circulating_supply: row.get_f64("self_reported_circulating_supply")?,
            total_supply: row.get_f64("total_supply")?,
            max_supply: row.get_opt_f64("max_supply")?,
            latest_price: row.get_f64("latest_price")?,
            rank: row.get_i64("rank")?,
            added_at: row.get_opt_timestamp("added_at")?,
            platform,
        })
    }
}

impl UpsertRecord for TrackedAsset {
    fn values(&self) -> Vec<SqlValue> {
        let platform = self
            .platform
            .as_ref()
            .and_then(|p| serde_json::to_value(p).ok())
            .map(SqlValue::Json)
            .unwrap_or(SqlValue::Null);

        vec![
            self.id.into(),
            self.symbol.clone().into(),
            self.slug.clone().into(),
            self.name.clone().into(),
            self.observed.into(),
            self.circulating_supply.into(),
            self.self_reported_circulating_supply.into(),
            self.total_supply.into(),
            self.max_supply.into(),
            self.latest_price.into(),
            self.rank.into(),
            self.added_at.into(),
            platform,
        ]
    }
}
