//! Job logging the biggest and the longest whale-share declines as JSON.

use anyhow::{Context, Result};
use log::info;

use crate::db::store::Store;
use crate::service::MarketService;
use crate::source::MarketDataSource;

pub async fn run<S, H>(service: &MarketService<S, H>, limit: usize) -> Result<()>
where
    S: MarketDataSource,
    H: Store,
{
    let biggest = service.report_biggest_decline(Some(limit)).await?;
    info!(
        "Biggest declines: {}",
        serde_json::to_string(&biggest).context("Failed to encode biggest declines")?
    );

    let longest = service.report_longest_decline(Some(limit)).await?;
    info!(
        "Longest declines: {}",
        serde_json::to_string(&longest).context("Failed to encode longest declines")?
    );
    Ok(())
}
