//! Cron scheduler for periodic background tasks.
//!
//! Runs jobs like:
//! - Importing the configured and observed assets
//! - Logging the biggest and longest whale-share declines

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{error, info};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::config::CronSettings;
use crate::db::store::Store;
use crate::service::MarketService;
use crate::source::MarketDataSource;

use super::jobs;

/// Cron scheduler that manages periodic background jobs.
pub struct CronScheduler<S, H> {
    service: Arc<MarketService<S, H>>,
    asset_slugs: Arc<Vec<String>>,
    settings: Arc<CronSettings>,
}

impl<S, H> CronScheduler<S, H>
where
    S: MarketDataSource + 'static,
    H: Store + 'static,
{
    pub fn new(
        service: Arc<MarketService<S, H>>,
        asset_slugs: Vec<String>,
        settings: CronSettings,
    ) -> Self {
        Self {
            service,
            asset_slugs: Arc::new(asset_slugs),
            settings: Arc::new(settings),
        }
    }

    /// Starts the cron scheduler and runs until cancellation.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        let mut scheduler = JobScheduler::new().await?;

        self.register_import_assets_job(&scheduler, cancellation_token.child_token())
            .await?;
        self.register_decline_report_job(&scheduler).await?;

        scheduler.start().await?;
        info!("Cron scheduler started with {} jobs", 2);

        cancellation_token.cancelled().await;
        info!("Cron scheduler shutting down...");

        scheduler.shutdown().await?;
        Ok(())
    }

    async fn register_import_assets_job(
        &self,
        scheduler: &JobScheduler,
        cancellation_token: CancellationToken,
    ) -> Result<()> {
        let service = self.service.clone();
        let slugs = self.asset_slugs.clone();
        let interval = self.settings.import_interval_secs;

        let job = Job::new_repeated_async(Duration::from_secs(interval), move |_uuid, _lock| {
            let service = service.clone();
            let slugs = slugs.clone();
            let cancellation_token = cancellation_token.clone();
            Box::pin(async move {
                if let Err(e) =
                    jobs::import_assets::run(&service, &slugs, &cancellation_token).await
                {
                    error!("Failed to import assets: {:#}", e);
                }
            })
        })?;

        scheduler.add(job).await?;
        info!("Registered import_assets job (every {}s)", interval);
        Ok(())
    }

    async fn register_decline_report_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let service = self.service.clone();
        let interval = self.settings.report_interval_secs;
        let limit = self.settings.report_limit;

        let job = Job::new_repeated_async(Duration::from_secs(interval), move |_uuid, _lock| {
            let service = service.clone();
            Box::pin(async move {
                if let Err(e) = jobs::decline_report::run(&service, limit).await {
                    error!("Failed to report declines: {:#}", e);
                }
            })
        })?;

        scheduler.add(job).await?;
        info!("Registered decline_report job (every {}s)", interval);
        Ok(())
    }
}
