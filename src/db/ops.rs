use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use log::error;

use crate::db::models::{ConcentrationSample, ImportCheckpoint, PriceCapSample, TrackedAsset};
use crate::db::store::Executor;
use crate::db::upsert::UpsertWriter;
use crate::db::value::SqlValue;
use crate::error::{Result, ResultExt};

const ASSET_COLUMNS: &str = "id, symbol, slug, name, observed, circulating_supply, \
     self_reported_circulating_supply, total_supply, max_supply, latest_price, rank, added_at, \
     platform";

// ==================== CHECKPOINTS ====================

/// Reads and row-locks the checkpoints of exactly `asset_ids` until the surrounding
/// transaction ends. Assets without a row are simply absent from the result.
pub async fn lock_checkpoints<E: Executor + ?Sized>(
    executor: &E,
    asset_ids: &[i64],
) -> Result<HashMap<i64, ImportCheckpoint>> {
    if asset_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let query = "SELECT asset_id, price_cap, concentration FROM market.import_checkpoints \
                 WHERE asset_id = ANY($1) FOR UPDATE";
    let rows = executor
        .query(query, &[SqlValue::IntArray(asset_ids.to_vec())])
        .await
        .context("lock import checkpoints")?;

    rows.iter()
        .map(|row| ImportCheckpoint::from_row(row).map(|c| (c.asset_id, c)))
        .collect()
}

pub async fn upsert_checkpoints<E: Executor + ?Sized>(
    executor: &E,
    writer: &UpsertWriter,
    checkpoints: &[ImportCheckpoint],
) -> Result<u64> {
    writer
        .upsert(executor, &ImportCheckpoint::TARGET, checkpoints)
        .await
        .context("upsert import checkpoints")
}

/// Inserts empty checkpoints for assets that have none; existing rows are left alone.
pub async fn create_empty_checkpoints<E: Executor + ?Sized>(
    executor: &E,
    writer: &UpsertWriter,
    asset_ids: &[i64],
) -> Result<u64> {
    let checkpoints: Vec<ImportCheckpoint> =
        asset_ids.iter().map(|id| ImportCheckpoint::new(*id)).collect();
    writer
        .upsert(executor, &ImportCheckpoint::CREATE_TARGET, &checkpoints)
        .await
        .context("create empty import checkpoints")
}

// ==================== ASSETS ====================

pub async fn upsert_assets<E: Executor + ?Sized>(
    executor: &E,
    writer: &UpsertWriter,
    assets: &[TrackedAsset],
) -> Result<u64> {
    writer.upsert(executor, &TrackedAsset::TARGET, assets).await.context("upsert assets")
}

/// Assets flagged for scheduled imports and reports, ordered by id.
pub async fn get_observed_assets<E: Executor + ?Sized>(executor: &E) -> Result<Vec<TrackedAsset>> {
    let query = format!(
        "SELECT {} FROM market.assets WHERE observed = TRUE ORDER BY id",
        ASSET_COLUMNS
    );
    let rows = executor.query(&query, &[]).await.map_err(|e| {
        error!("Failed to load observed assets: {}", e);
        e
    })?;

    rows.iter().map(TrackedAsset::from_row).collect()
}

// ==================== SAMPLES ====================

pub async fn upsert_price_caps<E: Executor + ?Sized>(
    executor: &E,
    writer: &UpsertWriter,
    samples: &[PriceCapSample],
) -> Result<u64> {
    writer.upsert(executor, &PriceCapSample::TARGET, samples).await.context("upsert price caps")
}

pub async fn upsert_concentrations<E: Executor + ?Sized>(
    executor: &E,
    writer: &UpsertWriter,
    samples: &[ConcentrationSample],
) -> Result<u64> {
    writer
        .upsert(executor, &ConcentrationSample::TARGET, samples)
        .await
        .context("upsert concentrations")
}

/// Price/cap points at or after `since`, grouped by asset, newest first.
pub async fn get_price_caps<E: Executor + ?Sized>(
    executor: &E,
    asset_ids: &[i64],
    since: DateTime<Utc>,
) -> Result<HashMap<i64, Vec<PriceCapSample>>> {
    if asset_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let query = "SELECT asset_id, ts, price, daily_volume, cap FROM market.price_caps \
                 WHERE asset_id = ANY($1) AND ts >= $2 ORDER BY asset_id, ts DESC";
    let rows = executor
        .query(query, &[SqlValue::IntArray(asset_ids.to_vec()), since.into()])
        .await
        .context("load price caps")?;

    let mut grouped: HashMap<i64, Vec<PriceCapSample>> = HashMap::new();
    for row in &rows {
        let sample = PriceCapSample::from_row(row)?;
        grouped.entry(sample.asset_id).or_default().push(sample);
    }
    Ok(grouped)
}

/// Concentration days at or after `since`, grouped by asset, newest day first.
pub async fn get_concentrations<E: Executor + ?Sized>(
    executor: &E,
    asset_ids: &[i64],
    since: NaiveDate,
) -> Result<HashMap<i64, Vec<ConcentrationSample>>> {
    if asset_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let query = "SELECT asset_id, d, whales, investors, retail FROM market.concentrations \
                 WHERE asset_id = ANY($1) AND d >= $2 ORDER BY asset_id, d DESC";
    let rows = executor
        .query(query, &[SqlValue::IntArray(asset_ids.to_vec()), since.into()])
        .await
        .context("load concentrations")?;

    let mut grouped: HashMap<i64, Vec<ConcentrationSample>> = HashMap::new();
    for row in &rows {
        let sample = ConcentrationSample::from_row(row)?;
        grouped.entry(sample.asset_id).or_default().push(sample);
    }
    Ok(grouped)
}
