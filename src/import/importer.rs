use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::ImporterSettings;
use crate::db::models::{ImportCheckpoint, Stream, TrackedAsset};
use crate::db::ops;
use crate::db::store::{Executor, Store};
use crate::db::upsert::UpsertWriter;
use crate::error::{AppError, Result, ResultExt};
use crate::import::supervisor::supervise;
use crate::import::window::windows_to_fetch;
use crate::source::MarketDataSource;

/// Pacing and deadline of an import cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSettings {
    /// Pause before each asset's price/cap requests
    pub price_cap_delay: Duration,
    /// Pause before each asset's concentration requests
    pub concentration_delay: Duration,
    /// The whole cycle is rolled back once this elapses
    pub cycle_timeout: Duration,
}

impl From<&ImporterSettings> for ImportSettings {
    fn from(settings: &ImporterSettings) -> Self {
        Self {
            price_cap_delay: Duration::from_secs(settings.price_cap_delay_secs),
            concentration_delay: Duration::from_secs(settings.concentration_delay_secs),
            cycle_timeout: Duration::from_secs(settings.cycle_timeout_secs),
        }
    }
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self::from(&ImporterSettings::default())
    }
}

/// Counts of one committed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub assets: usize,
    pub price_caps: usize,
    pub concentrations: usize,
    /// Stream checkpoints that moved forward
    pub checkpoints_advanced: usize,
}

/// Samples written for one stream and the latest timestamp among them.
struct StreamOutcome {
    written: usize,
    latest: Option<DateTime<Utc>>,
}

/// Runs import cycles: fetch stale windows from the source and write them, the asset rows and
/// the advanced checkpoints in a single transaction.
pub struct Importer<S> {
    source: Arc<S>,
    writer: UpsertWriter,
    settings: ImportSettings,
}

impl<S: MarketDataSource> Importer<S> {
    pub fn new(source: Arc<S>, settings: ImportSettings) -> Self {
        Self { source, writer: UpsertWriter::new(), settings }
    }

    pub fn with_writer(mut self, writer: UpsertWriter) -> Self {
        self.writer = writer;
        self
    }

    pub fn writer(&self) -> &UpsertWriter {
        &self.writer
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Imports `assets` in one transaction.
    ///
    /// Commits only if every asset and stream succeeded. Errors, panics, cancellation through
    /// `cancel` and the cycle deadline all roll the transaction back, so a failed cycle leaves
    /// samples and checkpoints untouched.
    pub async fn run_cycle<St>(
        &self,
        store: &St,
        assets: &[TrackedAsset],
        cancel: &CancellationToken,
    ) -> Result<ImportSummary>
    where
        St: Store + ?Sized,
    {
        let mut seen = HashSet::new();
        let assets: Vec<TrackedAsset> =
            assets.iter().filter(|a| seen.insert(a.id)).cloned().collect();
        if assets.is_empty() {
            return Ok(ImportSummary::default());
        }

        let started = Instant::now();
        info!("Starting import cycle for {} assets", assets.len());

        let tx = store.begin().await.context("begin import cycle")?;
        let now = Utc::now();

        let work = supervise("import cycle", self.import_in(&*tx, &assets, now));
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AppError::internal("import cycle cancelled")),
            result = tokio::time::timeout(self.settings.cycle_timeout, work) => match result {
                Ok(result) => result,
                Err(_) => Err(AppError::internal(format!(
                    "import cycle timed out after {:?}",
                    self.settings.cycle_timeout
                ))),
            },
        };

        match outcome {
            Ok(summary) => {
                tx.commit().await.context("commit import cycle")?;
                info!(
                    "Completed import cycle in {:?}: {} assets, {} price/cap points, {} concentration points, {} checkpoints advanced",
                    started.elapsed(),
                    summary.assets,
                    summary.price_caps,
                    summary.concentrations,
                    summary.checkpoints_advanced
                );
                Ok(summary)
            },
            Err(err) => {
                warn!("Import cycle failed after {:?}, rolling back: {}", started.elapsed(), err);
                match tx.rollback().await {
                    Ok(()) => Err(err),
                    Err(rollback) => Err(err.with_secondary(rollback.context("rollback"))),
                }
            },
        }
    }

    async fn import_in<E: Executor + ?Sized>(
        &self,
        executor: &E,
        assets: &[TrackedAsset],
        now: DateTime<Utc>,
    ) -> Result<ImportSummary> {
        let ids: Vec<i64> = assets.iter().map(|a| a.id).collect();
        let mut checkpoints = ops::lock_checkpoints(executor, &ids).await?;
        ops::upsert_assets(executor, &self.writer, assets).await?;

        let mut summary = ImportSummary { assets: assets.len(), ..Default::default() };

        for (i, asset) in assets.iter().enumerate() {
            debug!("{}. {} ({})", i, asset.symbol, asset.id);
            let checkpoint = checkpoints
                .entry(asset.id)
                .or_insert_with(|| ImportCheckpoint::new(asset.id));

            tokio::time::sleep(self.settings.price_cap_delay).await;
            let outcome = self
                .import_price_cap(executor, asset, checkpoint.get(Stream::PriceCap), now)
                .await
                .with_context(|| format!("import price/cap of {}", asset.slug))?;
            summary.price_caps += outcome.written;
            if let Some(latest) = outcome.latest {
                summary.checkpoints_advanced +=
                    usize::from(checkpoint.advance(Stream::PriceCap, latest));
            }

            tokio::time::sleep(self.settings.concentration_delay).await;
            let outcome = self
                .import_concentration(executor, asset, checkpoint.get(Stream::Concentration), now)
                .await
                .with_context(|| format!("import concentration of {}", asset.slug))?;
            summary.concentrations += outcome.written;
            if let Some(latest) = outcome.latest {
                summary.checkpoints_advanced +=
                    usize::from(checkpoint.advance(Stream::Concentration, latest));
            }
        }

        let updated: Vec<ImportCheckpoint> =
            ids.iter().filter_map(|id| checkpoints.remove(id)).collect();
        ops::upsert_checkpoints(executor, &self.writer, &updated).await?;

        Ok(summary)
    }

    async fn import_price_cap<E: Executor + ?Sized>(
        &self,
        executor: &E,
        asset: &TrackedAsset,
        checkpoint: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<StreamOutcome> {
        let mut outcome = StreamOutcome { written: 0, latest: None };
        for window in windows_to_fetch(now, checkpoint) {
            let samples = self
                .source
                .fetch_price_cap(asset.id, window)
                .await
                .with_context(|| format!("fetch {} window", window))?;
            ops::upsert_price_caps(executor, &self.writer, &samples).await?;

            outcome.written += samples.len();
            outcome.latest = outcome.latest.max(samples.iter().map(|s| s.ts).max());
        }
        Ok(outcome)
    }

    async fn import_concentration<E: Executor + ?Sized>(
        &self,
        executor: &E,
        asset: &TrackedAsset,
        checkpoint: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<StreamOutcome> {
        let mut outcome = StreamOutcome { written: 0, latest: None };
        for window in windows_to_fetch(now, checkpoint) {
            let samples = self
                .source
                .fetch_concentration(asset.id, window)
                .await
                .with_context(|| format!("fetch {} window", window))?;
            ops::upsert_concentrations(executor, &self.writer, &samples).await?;

            outcome.written += samples.len();
            outcome.latest = outcome.latest.max(samples.iter().map(|s| s.day_start()).max());
        }
        Ok(outcome)
    }
}
