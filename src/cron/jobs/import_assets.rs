//! Job importing the configured slugs plus every observed asset.

use anyhow::Result;
use log::info;
use tokio_util::sync::CancellationToken;

use crate::db::store::Store;
use crate::service::MarketService;
use crate::source::MarketDataSource;

pub async fn run<S, H>(
    service: &MarketService<S, H>,
    slugs: &[String],
    cancellation_token: &CancellationToken,
) -> Result<()>
where
    S: MarketDataSource,
    H: Store,
{
    info!("Starting import_assets job...");
    let start = std::time::Instant::now();

    let summary = service.import_observed(slugs, cancellation_token).await?;

    info!(
        "Completed import_assets job in {:?} ({} assets, {} checkpoints advanced)",
        start.elapsed(),
        summary.assets,
        summary.checkpoints_advanced
    );
    Ok(())
}
