use std::sync::Arc;

use anyhow::Context;
use jemallocator::Jemalloc;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use whalewatch::{
    config::StorageSettings, import::ImportSettings, CmcClient, Cluster, CronScheduler, Importer,
    MarketService, PostgresClient, ReplicaSet, Settings,
};

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .context("Failed to install logger")?;

    let settings = Settings::new()
        .context("Failed to load config.yaml. Please ensure it exists and is valid")?;

    let cluster = connect_cluster(&settings.storage)
        .await
        .context("Failed to initialize database connections")?;

    let replicas = cluster
        .replica_set_for(&settings.storage.keyspace)
        .context("Failed to resolve the market shard")?
        .clone();
    info!(
        "Market keyspace {:?} lives on shard {}",
        settings.storage.keyspace,
        cluster.shard_number(&settings.storage.keyspace)
    );

    let source = Arc::new(
        CmcClient::new(&settings.market_data).context("Failed to build market data client")?,
    );
    let importer = Importer::new(source, ImportSettings::from(&settings.importer));
    let service = Arc::new(MarketService::new(replicas, importer));

    let cancellation_token = CancellationToken::new();

    let cron_scheduler = CronScheduler::new(
        service,
        settings.importer.asset_slugs.clone(),
        settings.cron.clone(),
    );

    let cron_token = cancellation_token.child_token();
    let cron_handle = tokio::spawn(async move {
        if let Err(e) = cron_scheduler.run(cron_token).await {
            error!("Cron scheduler failed: {:#}", e);
        }
    });

    info!("Cron scheduler started - imports and reports will run periodically");

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    info!("whalewatch running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    info!("Finishing all tasks...");
    cancellation_token.cancel();

    info!("Waiting for cron scheduler to stop...");
    let _ = cron_handle.await;

    info!("Closing database connections...");
    cluster.close().context("Failed to close the cluster")?;

    info!("Shutdown complete");
    Ok(())
}

/// Connects every shard's write and read handle and migrates the write handles.
async fn connect_cluster(storage: &StorageSettings) -> anyhow::Result<Cluster<PostgresClient>> {
    let mut replica_sets = Vec::with_capacity(storage.shards.len());

    for (i, shard) in storage.shards.iter().enumerate() {
        let write = PostgresClient::new(shard.write.clone())
            .await
            .with_context(|| format!("Failed to connect write handle of shard {}", i + 1))?;
        write
            .migrate()
            .await
            .with_context(|| format!("Failed to migrate shard {}", i + 1))?;

        let read = PostgresClient::new(shard.read.clone())
            .await
            .with_context(|| format!("Failed to connect read handle of shard {}", i + 1))?;

        replica_sets.push(ReplicaSet::new(Arc::new(write), Arc::new(read)));
    }

    Ok(Cluster::from_replica_sets(replica_sets)?)
}
