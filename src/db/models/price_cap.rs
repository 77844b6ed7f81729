use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::upsert::{UpsertRecord, UpsertTarget};
use crate::db::value::{SqlRow, SqlValue};
use crate::error::Result;

/// Price and capitalization point (PostgreSQL)
///
/// Primary Key: (asset_id, ts)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceCapSample {
    pub asset_id: i64,
    pub ts: DateTime<Utc>,
    pub price: f64,
    pub daily_volume: f64,
    pub cap: f64,
}

impl PriceCapSample {
    pub const TARGET: UpsertTarget = UpsertTarget {
        table: "market.price_caps",
        key_columns: &["asset_id", "ts"],
        columns: &["asset_id", "ts", "price", "daily_volume", "cap"],
        on_conflict_do_nothing: false,
    };

    pub fn from_row(row: &SqlRow) -> Result<Self> {
        Ok(Self {
            asset_id: row.get_i64("asset_id")?,
            ts: row.get_timestamp("ts")?,
            price: row.get_f64("price")?,
            daily_volume: row.get_f64("daily_volume")?,
            cap: row.get_f64("cap")?,
        })
    }
}

impl UpsertRecord for PriceCapSample {
    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.asset_id.into(),
            self.ts.into(),
            self.price.into(),
            self.daily_volume.into(),
            self.cap.into(),
        ]
    }
}
