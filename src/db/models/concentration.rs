use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use crate::db::upsert::{UpsertRecord, UpsertTarget};
use crate::db::value::{SqlRow, SqlValue};
use crate::error::Result;

/// Daily holder concentration, in percent of supply (PostgreSQL)
///
/// Primary Key: (asset_id, d)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConcentrationSample {
    pub asset_id: i64,
    pub day: NaiveDate,
    pub whales: f64,
    pub investors: f64,
    pub retail: f64,
}

impl ConcentrationSample {
    pub const TARGET: UpsertTarget = UpsertTarget {
        table: "market.concentrations",
        key_columns: &["asset_id", "d"],
        columns: &["asset_id", "d", "whales", "investors", "retail"],
        on_conflict_do_nothing: false,
    };

    /// Midnight UTC of the sample's day.
    pub fn day_start(&self) -> DateTime<Utc> {
        self.day.and_time(NaiveTime::MIN).and_utc()
    }

    pub fn from_row(row: &SqlRow) -> Result<Self> {
        Ok(Self {
            asset_id: row.get_i64("asset_id")?,
            day: row.get_date("d")?,
            whales: row.get_f64("whales")?,
            investors: row.get_f64("investors")?,
            retail: row.get_f64("retail")?,
        })
    }
}

impl UpsertRecord for ConcentrationSample {
    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.asset_id.into(),
            self.day.into(),
            self.whales.into(),
            self.investors.into(),
            self.retail.into(),
        ]
    }
}
