//! In-memory store and scripted market data source shared by the integration tests.
//!
//! The store understands exactly the statement shapes the crate issues: batched
//! `INSERT ... ON CONFLICT` upserts and `SELECT ... WHERE ... ORDER BY ... [FOR UPDATE]` reads.

#![allow(dead_code)]

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tokio::sync::OwnedMutexGuard;
use whalewatch::db::models::{
    ConcentrationSample, ImportCheckpoint, PriceCapSample, TrackedAsset,
};
use whalewatch::db::{Executor, SqlRow, SqlValue, Store, Transaction};
use whalewatch::import::{ImportSettings, Importer};
use whalewatch::{AppError, MarketDataSource, Result, TimeWindow};

type Row = HashMap<String, SqlValue>;

#[derive(Debug, Clone, Default)]
struct Table {
    /// Debug rendering of the key values -> row
    rows: BTreeMap<String, Row>,
}

type Tables = HashMap<String, Table>;

fn apply(tables: &mut Tables, statement: &str, params: &[SqlValue]) -> Result<u64> {
    let statement = statement.trim();
    if statement.starts_with("INSERT INTO ") {
        insert(tables, statement, params)
    } else {
        Err(AppError::internal(format!("memory store cannot execute {}", statement)))
    }
}

fn between<'a>(s: &'a str, open: &str, close: &str) -> Result<&'a str> {
    let start = s
        .find(open)
        .ok_or_else(|| AppError::internal(format!("missing {:?} in {}", open, s)))?
        + open.len();
    let end = s[start..]
        .find(close)
        .ok_or_else(|| AppError::internal(format!("missing {:?} in {}", close, s)))?;
    Ok(&s[start..start + end])
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',').map(|c| c.trim().to_string()).collect()
}

fn insert(tables: &mut Tables, statement: &str, params: &[SqlValue]) -> Result<u64> {
    let table = between(statement, "INSERT INTO ", " (")?.to_string();
    let columns = split_list(between(statement, " (", ")")?);
    let keys = split_list(between(statement, "ON CONFLICT (", ")")?);
    let do_nothing = statement.ends_with("DO NOTHING");

    if params.len() % columns.len() != 0 {
        return Err(AppError::internal("parameter count is not a multiple of the columns"));
    }

    // PostgreSQL refuses to affect one row twice in a single statement
    let mut touched = HashSet::new();
    let mut keyed = Vec::with_capacity(params.len() / columns.len());
    for values in params.chunks(columns.len()) {
        let row: Row = columns.iter().cloned().zip(values.iter().cloned()).collect();
        let key = format!("{:?}", keys.iter().map(|k| &row[k]).collect::<Vec<_>>());
        if !touched.insert(key.clone()) {
            return Err(AppError::internal(format!(
                "ON CONFLICT command cannot affect row {} a second time",
                key
            )));
        }
        keyed.push((key, row));
    }

    let table = tables.entry(table).or_default();
    let mut affected = 0;
    for (key, row) in keyed {
        if do_nothing && table.rows.contains_key(&key) {
            continue;
        }
        table.rows.insert(key, row);
        affected += 1;
    }
    Ok(affected)
}

fn compare(a: &SqlValue, b: &SqlValue) -> CmpOrdering {
    match (a, b) {
        (SqlValue::Int(a), SqlValue::Int(b)) => a.cmp(b),
        (SqlValue::Float(a), SqlValue::Float(b)) => a.partial_cmp(b).unwrap_or(CmpOrdering::Equal),
        (SqlValue::Text(a), SqlValue::Text(b)) => a.cmp(b),
        (SqlValue::Bool(a), SqlValue::Bool(b)) => a.cmp(b),
        (SqlValue::Timestamp(a), SqlValue::Timestamp(b)) => a.cmp(b),
        (SqlValue::Date(a), SqlValue::Date(b)) => a.cmp(b),
        (SqlValue::Null, SqlValue::Null) => CmpOrdering::Equal,
        (SqlValue::Null, _) => CmpOrdering::Less,
        (_, SqlValue::Null) => CmpOrdering::Greater,
        (a, b) => panic!("cannot compare {:?} with {:?}", a, b),
    }
}

fn param(params: &[SqlValue], placeholder: &str) -> Result<SqlValue> {
    let index: usize = placeholder
        .trim_start_matches('$')
        .parse()
        .map_err(|_| AppError::internal(format!("bad placeholder {}", placeholder)))?;
    params
        .get(index - 1)
        .cloned()
        .ok_or_else(|| AppError::internal(format!("missing parameter {}", placeholder)))
}

fn matches(row: &Row, condition: &str, params: &[SqlValue]) -> Result<bool> {
    if let Some((column, rest)) = condition.split_once(" = ANY(") {
        let SqlValue::IntArray(ids) = param(params, rest.trim_end_matches(')'))? else {
            return Err(AppError::internal("ANY expects an integer array"));
        };
        return Ok(matches!(row.get(column), Some(SqlValue::Int(v)) if ids.contains(v)));
    }
    if let Some((column, placeholder)) = condition.split_once(" >= ") {
        let bound = param(params, placeholder)?;
        return Ok(row.get(column).is_some_and(|v| compare(v, &bound) != CmpOrdering::Less));
    }
    if let Some(column) = condition.strip_suffix(" = TRUE") {
        return Ok(matches!(row.get(column), Some(SqlValue::Bool(true))));
    }
    Err(AppError::internal(format!("unsupported condition {}", condition)))
}

fn select(tables: &Tables, statement: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
    let statement = statement.trim().trim_end_matches(" FOR UPDATE");
    let columns = split_list(between(statement, "SELECT ", " FROM ")?);

    let rest = &statement[statement.find(" FROM ").map(|i| i + 6).unwrap_or_default()..];
    let (head, order) = rest.split_once(" ORDER BY ").unwrap_or((rest, ""));
    let (table, conditions) = head.split_once(" WHERE ").unwrap_or((head, ""));

    let Some(table) = tables.get(table.trim()) else {
        return Ok(Vec::new());
    };

    let mut rows = Vec::new();
    for row in table.rows.values() {
        let mut keep = true;
        for condition in conditions.split(" AND ").filter(|c| !c.is_empty()) {
            keep &= matches(row, condition.trim(), params)?;
        }
        if keep {
            rows.push(row.clone());
        }
    }

    let order: Vec<(String, bool)> = order
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(|o| match o.strip_suffix(" DESC") {
            Some(column) => (column.to_string(), true),
            None => (o.to_string(), false),
        })
        .collect();
    rows.sort_by(|a, b| {
        for (column, desc) in &order {
            let ord = compare(&a[column], &b[column]);
            let ord = if *desc { ord.reverse() } else { ord };
            if ord != CmpOrdering::Equal {
                return ord;
            }
        }
        CmpOrdering::Equal
    });

    Ok(rows
        .into_iter()
        .map(|row| {
            let values = columns.iter().map(|c| row.get(c).cloned().unwrap_or(SqlValue::Null)).collect();
            SqlRow::new(columns.clone(), values)
        })
        .collect())
}

/// Store keeping tables in memory. Transactions work on a snapshot that replaces the
/// committed state on commit; one transaction is open at a time.
#[derive(Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    writer_lock: Arc<tokio::sync::Mutex<()>>,
    pub commits: Arc<AtomicUsize>,
    pub rollbacks: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self, table: &str) -> usize {
        self.tables.lock().unwrap().get(table).map_or(0, |t| t.rows.len())
    }

    pub async fn checkpoint(&self, asset_id: i64) -> Option<ImportCheckpoint> {
        let rows = self
            .query(
                "SELECT asset_id, price_cap, concentration FROM market.import_checkpoints WHERE asset_id = ANY($1)",
                &[SqlValue::IntArray(vec![asset_id])],
            )
            .await
            .unwrap();
        rows.first().map(|row| ImportCheckpoint::from_row(row).unwrap())
    }

    pub async fn price_caps(&self, asset_id: i64) -> Vec<PriceCapSample> {
        self.query(
            "SELECT asset_id, ts, price, daily_volume, cap FROM market.price_caps WHERE asset_id = ANY($1) ORDER BY ts",
            &[SqlValue::IntArray(vec![asset_id])],
        )
        .await
        .unwrap()
        .iter()
        .map(|row| PriceCapSample::from_row(row).unwrap())
        .collect()
    }

    pub async fn concentrations(&self, asset_id: i64) -> Vec<ConcentrationSample> {
        self.query(
            "SELECT asset_id, d, whales, investors, retail FROM market.concentrations WHERE asset_id = ANY($1) ORDER BY d",
            &[SqlValue::IntArray(vec![asset_id])],
        )
        .await
        .unwrap()
        .iter()
        .map(|row| ConcentrationSample::from_row(row).unwrap())
        .collect()
    }
}

#[async_trait]
impl Executor for MemoryStore {
    async fn execute(&self, statement: &str, params: &[SqlValue]) -> Result<u64> {
        apply(&mut self.tables.lock().unwrap(), statement, params)
    }

    async fn query(&self, statement: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        select(&self.tables.lock().unwrap(), statement, params)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let guard = self.writer_lock.clone().lock_owned().await;
        let snapshot = self.tables.lock().unwrap().clone();
        Ok(Box::new(MemoryTransaction {
            snapshot: Mutex::new(snapshot),
            committed: self.tables.clone(),
            commits: self.commits.clone(),
            rollbacks: self.rollbacks.clone(),
            _guard: guard,
        }))
    }
}

pub struct MemoryTransaction {
    snapshot: Mutex<Tables>,
    committed: Arc<Mutex<Tables>>,
    commits: Arc<AtomicUsize>,
    rollbacks: Arc<AtomicUsize>,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl Executor for MemoryTransaction {
    async fn execute(&self, statement: &str, params: &[SqlValue]) -> Result<u64> {
        apply(&mut self.snapshot.lock().unwrap(), statement, params)
    }

    async fn query(&self, statement: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        select(&self.snapshot.lock().unwrap(), statement, params)
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        let snapshot = std::mem::take(&mut *self.snapshot.lock().unwrap());
        *self.committed.lock().unwrap() = snapshot;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// What the scripted source does when asked about an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    FailConcentration,
    Panic,
    Hang,
}

/// Market data source answering from in-memory scripts and recording every request.
#[derive(Default)]
pub struct FakeSource {
    assets: Mutex<HashMap<String, TrackedAsset>>,
    price_caps: Mutex<HashMap<(i64, TimeWindow), Vec<PriceCapSample>>>,
    concentrations: Mutex<HashMap<(i64, TimeWindow), Vec<ConcentrationSample>>>,
    faults: Mutex<HashMap<i64, Fault>>,
    pub requests: Mutex<Vec<(i64, &'static str, TimeWindow)>>,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_asset(&self, asset: TrackedAsset) {
        self.assets.lock().unwrap().insert(asset.slug.clone(), asset);
    }

    pub fn set_price_caps(&self, asset_id: i64, window: TimeWindow, samples: Vec<PriceCapSample>) {
        self.price_caps.lock().unwrap().insert((asset_id, window), samples);
    }

    pub fn set_concentrations(
        &self,
        asset_id: i64,
        window: TimeWindow,
        samples: Vec<ConcentrationSample>,
    ) {
        self.concentrations.lock().unwrap().insert((asset_id, window), samples);
    }

    pub fn set_fault(&self, asset_id: i64, fault: Fault) {
        self.faults.lock().unwrap().insert(asset_id, fault);
    }

    pub fn windows_requested(&self, asset_id: i64, stream: &str) -> Vec<TimeWindow> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, s, _)| *id == asset_id && *s == stream)
            .map(|(_, _, w)| *w)
            .collect()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }

    fn fault(&self, asset_id: i64) -> Option<Fault> {
        self.faults.lock().unwrap().get(&asset_id).copied()
    }
}

#[async_trait]
impl MarketDataSource for FakeSource {
    async fn fetch_price_cap(&self, asset_id: i64, window: TimeWindow) -> Result<Vec<PriceCapSample>> {
        self.requests.lock().unwrap().push((asset_id, "price_cap", window));
        match self.fault(asset_id) {
            Some(Fault::Panic) => panic!("scripted panic for asset {}", asset_id),
            Some(Fault::Hang) => std::future::pending::<()>().await,
            _ => {},
        }
        Ok(self.price_caps.lock().unwrap().get(&(asset_id, window)).cloned().unwrap_or_default())
    }

    async fn fetch_concentration(
        &self,
        asset_id: i64,
        window: TimeWindow,
    ) -> Result<Vec<ConcentrationSample>> {
        self.requests.lock().unwrap().push((asset_id, "concentration", window));
        if self.fault(asset_id) == Some(Fault::FailConcentration) {
            return Err(AppError::internal(format!("provider unavailable for {}", asset_id)));
        }
        Ok(self
            .concentrations
            .lock()
            .unwrap()
            .get(&(asset_id, window))
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_asset_metadata(&self, slug: &str) -> Result<TrackedAsset> {
        self.assets
            .lock()
            .unwrap()
            .get(slug)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("asset {}", slug)))
    }
}

pub fn asset(id: i64, symbol: &str) -> TrackedAsset {
    TrackedAsset {
        id,
        symbol: symbol.to_uppercase(),
        slug: symbol.to_lowercase(),
        name: symbol.to_string(),
        observed: false,
        circulating_supply: 1_000.0,
        self_reported_circulating_supply: 0.0,
        total_supply: 2_000.0,
        max_supply: None,
        latest_price: 1.5,
        rank: id,
        added_at: Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()),
        platform: None,
    }
}

pub fn price_cap(asset_id: i64, ts: DateTime<Utc>, price: f64) -> PriceCapSample {
    PriceCapSample { asset_id, ts, price, daily_volume: price * 10.0, cap: price * 1_000.0 }
}

pub fn concentration(asset_id: i64, day: NaiveDate, whales: f64) -> ConcentrationSample {
    ConcentrationSample { asset_id, day, whales, investors: 30.0, retail: 70.0 - whales }
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn days_ago(days: i64) -> NaiveDate {
    today() - chrono::Duration::days(days)
}

/// Import settings without pacing delays.
pub fn fast_settings() -> ImportSettings {
    ImportSettings {
        price_cap_delay: Duration::ZERO,
        concentration_delay: Duration::ZERO,
        cycle_timeout: Duration::from_secs(10),
    }
}

pub fn importer(source: Arc<FakeSource>) -> Importer<FakeSource> {
    Importer::new(source, fast_settings())
}

pub fn ids(assets: &[TrackedAsset]) -> HashSet<i64> {
    assets.iter().map(|a| a.id).collect()
}
