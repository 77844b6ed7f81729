use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::upsert::{UpsertRecord, UpsertTarget};
use crate::db::value::{SqlRow, SqlValue};
use crate::error::Result;

/// Imported data streams that carry their own high-water mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    PriceCap,
    Concentration,
}

impl std::fmt::Display for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stream::PriceCap => write!(f, "price_cap"),
            Stream::Concentration => write!(f, "concentration"),
        }
    }
}

/// Import progress checkpoint (PostgreSQL).
///
/// Holds the latest imported timestamp of each stream for one asset. Used to decide how much
/// history the next cycle has to re-fetch. Timestamps only ever move forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCheckpoint {
    pub asset_id: i64,
    pub price_cap: Option<DateTime<Utc>>,
    pub concentration: Option<DateTime<Utc>>,
}

impl ImportCheckpoint {
    pub const TARGET: UpsertTarget = UpsertTarget {
        table: "market.import_checkpoints",
        key_columns: &["asset_id"],
        columns: &["asset_id", "price_cap", "concentration"],
        on_conflict_do_nothing: false,
    };

    /// Inserts missing rows only, so existing progress is never reset.
    pub const CREATE_TARGET: UpsertTarget =
        UpsertTarget { on_conflict_do_nothing: true, ..Self::TARGET };

    pub fn new(asset_id: i64) -> Self {
        Self { asset_id, price_cap: None, concentration: None }
    }

    pub fn get(&self, stream: Stream) -> Option<DateTime<Utc>> {
        match stream {
            Stream::PriceCap => self.price_cap,
            Stream::Concentration => self.concentration,
        }
    }

    /// Moves the stream's mark to `observed` if that is later. Returns whether it moved.
    pub fn advance(&mut self, stream: Stream, observed: DateTime<Utc>) -> bool {
        let slot = match stream {
            Stream::PriceCap => &mut self.price_cap,
            Stream::Concentration => &mut self.concentration,
        };
        match slot {
            Some(current) if *current >= observed => false,
            _ => {
                *slot = Some(observed);
                true
            },
        }
    }

    pub fn from_row(row: &SqlRow) -> Result<Self> {
        Ok(Self {
            asset_id: row.get_i64("asset_id")?,
            price_cap: row.get_opt_timestamp("price_cap")?,
            concentration: row.get_opt_timestamp("concentration")?,
        })
    }
}

impl UpsertRecord for ImportCheckpoint {
    fn values(&self) -> Vec<SqlValue> {
        vec![self.asset_id.into(), self.price_cap.into(), self.concentration.into()]
    }
}
