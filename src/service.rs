//! Market dataset surface used by the application: imports and decline reports.
//!
//! Writes go through the replica set's write handle, reports through the read handle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::cluster::ReplicaSet;
use crate::db::models::TrackedAsset;
use crate::db::ops;
use crate::db::store::Store;
use crate::error::{Result, ResultExt};
use crate::import::{ImportSummary, Importer};
use crate::report::{detect_decline, rank_biggest, rank_longest, DeclineParams, DeclineReport};
use crate::source::MarketDataSource;

pub struct MarketService<S, H> {
    replicas: ReplicaSet<H>,
    importer: Importer<S>,
    decline: DeclineParams,
}

impl<S, H> MarketService<S, H>
where
    S: MarketDataSource,
    H: Store,
{
    pub fn new(replicas: ReplicaSet<H>, importer: Importer<S>) -> Self {
        Self { replicas, importer, decline: DeclineParams::default() }
    }

    pub fn with_decline_params(mut self, params: DeclineParams) -> Self {
        self.decline = params;
        self
    }

    fn source(&self) -> &Arc<S> {
        self.importer.source()
    }

    /// Looks up every slug and imports the found assets in one cycle. Unknown slugs are skipped.
    ///
    /// Imported assets are marked observed, so later scheduled imports and reports include them.
    pub async fn import(&self, slugs: &[String], cancel: &CancellationToken) -> Result<ImportSummary> {
        let assets = self.resolve(slugs, &HashMap::new()).await?;
        self.importer.run_cycle(self.replicas.write_repo().as_ref(), &assets, cancel).await
    }

    /// Imports every observed asset plus `extra_slugs`.
    ///
    /// Metadata of observed assets is refreshed from the source; an observed asset the source no
    /// longer knows keeps its stored metadata.
    pub async fn import_observed(
        &self,
        extra_slugs: &[String],
        cancel: &CancellationToken,
    ) -> Result<ImportSummary> {
        let observed = ops::get_observed_assets(self.replicas.write_repo().as_ref())
            .await
            .context("load observed assets")?;

        let mut slugs: Vec<String> = observed.iter().map(|a| a.slug.clone()).collect();
        slugs.extend(extra_slugs.iter().cloned());
        let stored: HashMap<String, TrackedAsset> =
            observed.into_iter().map(|a| (a.slug.clone(), a)).collect();

        let assets = self.resolve(&slugs, &stored).await?;
        self.importer.run_cycle(self.replicas.write_repo().as_ref(), &assets, cancel).await
    }

    /// Stores an asset as observed with empty checkpoints, without importing any history.
    pub async fn register_asset(&self, slug: &str) -> Result<TrackedAsset> {
        let mut asset = self
            .source()
            .fetch_asset_metadata(slug)
            .await
            .with_context(|| format!("fetch metadata of {}", slug))?;
        asset.observed = true;

        let tx = self.replicas.write_repo().begin().await?;
        let writer = self.importer.writer();
        let written = async {
            ops::upsert_assets(&*tx, writer, std::slice::from_ref(&asset)).await?;
            ops::create_empty_checkpoints(&*tx, writer, &[asset.id]).await
        }
        .await;

        match written {
            Ok(_) => {
                tx.commit().await.context("commit asset registration")?;
                info!("Registered asset {} ({})", asset.slug, asset.id);
                Ok(asset)
            },
            Err(err) => match tx.rollback().await {
                Ok(()) => Err(err),
                Err(rollback) => Err(err.with_secondary(rollback.context("rollback"))),
            },
        }
    }

    /// Observed assets with the largest whale-share drop first.
    pub async fn report_biggest_decline(&self, limit: Option<usize>) -> Result<Vec<DeclineReport>> {
        let reports = self.detect_declines(Utc::now()).await?;
        Ok(rank_biggest(reports, limit))
    }

    /// Observed assets with the longest decline first.
    pub async fn report_longest_decline(&self, limit: Option<usize>) -> Result<Vec<DeclineReport>> {
        let reports = self.detect_declines(Utc::now()).await?;
        Ok(rank_longest(reports, limit))
    }

    async fn detect_declines(&self, now: DateTime<Utc>) -> Result<Vec<DeclineReport>> {
        let read = self.replicas.read_repo().as_ref();

        let assets = ops::get_observed_assets(read).await.context("load observed assets")?;
        let ids: Vec<i64> = assets.iter().map(|a| a.id).collect();

        let since = (now - self.decline.max_lookback).date_naive();
        let mut concentrations = ops::get_concentrations(read, &ids, since).await?;
        let mut price_caps =
            ops::get_price_caps(read, &ids, since.and_time(NaiveTime::MIN).and_utc()).await?;

        let reports = assets
            .iter()
            .filter_map(|asset| {
                let history = concentrations.remove(&asset.id).unwrap_or_default();
                let prices = price_caps.remove(&asset.id).unwrap_or_default();
                detect_decline(asset.id, &asset.symbol, &history, &prices, now, &self.decline)
            })
            .collect::<Vec<_>>();

        info!("Detected {} declines across {} observed assets", reports.len(), assets.len());
        Ok(reports)
    }

    /// Fetches metadata for each distinct slug and marks the result observed. A slug the source
    /// does not know falls back to its `stored` row, or is skipped when there is none.
    async fn resolve(
        &self,
        slugs: &[String],
        stored: &HashMap<String, TrackedAsset>,
    ) -> Result<Vec<TrackedAsset>> {
        let mut seen = HashSet::new();
        let mut assets = Vec::with_capacity(slugs.len());

        for slug in slugs.iter().filter(|s| seen.insert(s.as_str())) {
            let asset = match self.source().fetch_asset_metadata(slug).await {
                Ok(asset) => asset,
                Err(e) if e.is_not_found() => match stored.get(slug) {
                    Some(asset) => {
                        warn!("Asset {} not found at the source, keeping stored metadata", slug);
                        asset.clone()
                    },
                    None => {
                        warn!("Skipping unknown asset {}", slug);
                        continue;
                    },
                },
                Err(e) => return Err(e.context(format!("fetch metadata of {}", slug))),
            };
            assets.push(TrackedAsset { observed: true, ..asset });
        }

        Ok(assets)
    }
}
