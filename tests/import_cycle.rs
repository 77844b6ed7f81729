mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveTime, Utc};
use tokio_util::sync::CancellationToken;
use whalewatch::db::models::{ImportCheckpoint, Stream};
use whalewatch::db::UpsertWriter;
use whalewatch::import::{ImportSettings, Importer};
use whalewatch::{ErrorKind, TimeWindow};

use common::{
    asset, concentration, days_ago, fast_settings, importer, price_cap, FakeSource, Fault,
    MemoryStore,
};

/// Source with a month of daily price points and concentration days for `asset_id`, plus one
/// year-old point only served by the wider windows.
fn scripted_source(asset_ids: &[i64]) -> std::sync::Arc<FakeSource> {
    let source = FakeSource::new();
    let now = Utc::now();
    for &id in asset_ids {
        let month: Vec<_> = (1..=30)
            .map(|d| price_cap(id, now - ChronoDuration::days(d), 100.0 + d as f64))
            .collect();
        let mut year = month.clone();
        year.push(price_cap(id, now - ChronoDuration::days(200), 50.0));

        source.set_price_caps(id, TimeWindow::Month, month);
        source.set_price_caps(id, TimeWindow::Year, year.clone());
        source.set_price_caps(id, TimeWindow::All, year);

        let days: Vec<_> = (1..=30)
            .map(|d| concentration(id, days_ago(d), 40.0 - d as f64 / 10.0))
            .collect();
        source.set_concentrations(id, TimeWindow::Month, days.clone());
        source.set_concentrations(id, TimeWindow::Year, days.clone());
        source.set_concentrations(id, TimeWindow::All, days);
    }
    source
}

#[tokio::test]
async fn test_first_cycle_imports_every_window() {
    let store = MemoryStore::new();
    let source = scripted_source(&[1, 2]);
    let importer = importer(source.clone());

    let summary = importer
        .run_cycle(store.as_ref(), &[asset(1, "btc"), asset(2, "eth")], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.assets, 2);
    assert_eq!(summary.checkpoints_advanced, 4);
    assert_eq!(
        source.windows_requested(1, "price_cap"),
        vec![TimeWindow::All, TimeWindow::Year, TimeWindow::Month]
    );
    assert_eq!(
        source.windows_requested(2, "concentration"),
        vec![TimeWindow::All, TimeWindow::Year, TimeWindow::Month]
    );

    assert_eq!(store.count("market.assets"), 2);
    assert_eq!(store.price_caps(1).await.len(), 31);
    assert_eq!(store.concentrations(2).await.len(), 30);

    let checkpoint = store.checkpoint(1).await.unwrap();
    let latest_price = store.price_caps(1).await.last().unwrap().ts;
    assert_eq!(checkpoint.price_cap, Some(latest_price));
    assert_eq!(
        checkpoint.concentration,
        Some(days_ago(1).and_time(NaiveTime::MIN).and_utc())
    );
    assert_eq!(store.commits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rerun_is_idempotent_and_narrows_windows() {
    let store = MemoryStore::new();
    let source = scripted_source(&[1]);
    let importer = importer(source.clone());
    let assets = [asset(1, "btc")];
    let cancel = CancellationToken::new();

    importer.run_cycle(store.as_ref(), &assets, &cancel).await.unwrap();
    let prices = store.price_caps(1).await;
    let days = store.concentrations(1).await;
    let checkpoint = store.checkpoint(1).await.unwrap();

    source.clear_requests();
    let summary = importer.run_cycle(store.as_ref(), &assets, &cancel).await.unwrap();

    assert_eq!(summary.checkpoints_advanced, 0);
    assert_eq!(source.windows_requested(1, "price_cap"), vec![TimeWindow::Month]);
    assert_eq!(source.windows_requested(1, "concentration"), vec![TimeWindow::Month]);
    assert_eq!(store.price_caps(1).await, prices);
    assert_eq!(store.concentrations(1).await, days);
    assert_eq!(store.checkpoint(1).await.unwrap(), checkpoint);
}

#[tokio::test]
async fn test_checkpoint_never_moves_backwards() {
    let store = MemoryStore::new();
    let source = scripted_source(&[1]);
    let importer = importer(source.clone());
    let assets = [asset(1, "btc")];
    let cancel = CancellationToken::new();

    importer.run_cycle(store.as_ref(), &assets, &cancel).await.unwrap();
    let before = store.checkpoint(1).await.unwrap();

    // The provider now only serves older points.
    let old = Utc::now() - ChronoDuration::days(20);
    source.set_price_caps(1, TimeWindow::Month, vec![price_cap(1, old, 1.0)]);
    source.set_concentrations(1, TimeWindow::Month, vec![concentration(1, days_ago(20), 10.0)]);

    let summary = importer.run_cycle(store.as_ref(), &assets, &cancel).await.unwrap();
    assert_eq!(summary.price_caps, 1);
    assert_eq!(summary.checkpoints_advanced, 0);
    assert_eq!(store.checkpoint(1).await.unwrap(), before);
}

#[tokio::test]
async fn test_existing_checkpoint_is_extended() {
    let store = MemoryStore::new();
    let source = scripted_source(&[1]);
    let importer = importer(source.clone());
    let assets = [asset(1, "btc")];
    let cancel = CancellationToken::new();

    importer.run_cycle(store.as_ref(), &assets, &cancel).await.unwrap();
    let before = store.checkpoint(1).await.unwrap();

    let newer = Utc::now() - ChronoDuration::hours(1);
    source.set_price_caps(1, TimeWindow::Month, vec![price_cap(1, newer, 200.0)]);

    let summary = importer.run_cycle(store.as_ref(), &assets, &cancel).await.unwrap();
    let after = store.checkpoint(1).await.unwrap();

    assert_eq!(summary.checkpoints_advanced, 1);
    assert_eq!(after.get(Stream::PriceCap), Some(newer));
    assert_eq!(after.get(Stream::Concentration), before.get(Stream::Concentration));
}

#[tokio::test]
async fn test_failing_asset_rolls_back_the_whole_batch() {
    let store = MemoryStore::new();
    let source = scripted_source(&[1, 2]);
    source.set_fault(2, Fault::FailConcentration);
    let importer = importer(source.clone());

    let err = importer
        .run_cycle(store.as_ref(), &[asset(1, "btc"), asset(2, "eth")], &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(err.to_string().contains("import concentration of eth"));
    assert!(err.to_string().contains("provider unavailable for 2"));

    // asset 1 was fully imported inside the transaction before asset 2 failed
    assert_eq!(source.windows_requested(1, "concentration").len(), 3);
    assert_eq!(store.count("market.assets"), 0);
    assert_eq!(store.count("market.price_caps"), 0);
    assert_eq!(store.count("market.concentrations"), 0);
    assert_eq!(store.count("market.import_checkpoints"), 0);
    assert_eq!(store.rollbacks.load(Ordering::SeqCst), 1);
    assert_eq!(store.commits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_cycle_keeps_previous_progress() {
    let store = MemoryStore::new();
    let source = scripted_source(&[1]);
    let importer = importer(source.clone());
    let assets = [asset(1, "btc")];
    let cancel = CancellationToken::new();

    importer.run_cycle(store.as_ref(), &assets, &cancel).await.unwrap();
    let checkpoint = store.checkpoint(1).await.unwrap();
    let prices = store.price_caps(1).await;

    source.set_price_caps(1, TimeWindow::Month, vec![price_cap(1, Utc::now(), 999.0)]);
    source.set_fault(1, Fault::FailConcentration);
    assert!(importer.run_cycle(store.as_ref(), &assets, &cancel).await.is_err());

    assert_eq!(store.checkpoint(1).await.unwrap(), checkpoint);
    assert_eq!(store.price_caps(1).await, prices);
}

#[tokio::test]
async fn test_panic_is_reported_as_internal() {
    let store = MemoryStore::new();
    let source = scripted_source(&[1, 2]);
    source.set_fault(2, Fault::Panic);
    let importer = importer(source);

    let err = importer
        .run_cycle(store.as_ref(), &[asset(1, "btc"), asset(2, "eth")], &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(err.to_string().contains("scripted panic for asset 2"));
    assert!(err.to_string().contains("backtrace"));
    assert_eq!(store.count("market.price_caps"), 0);
    assert_eq!(store.rollbacks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancellation_rolls_back() {
    let store = MemoryStore::new();
    let source = scripted_source(&[1, 2]);
    source.set_fault(2, Fault::Hang);
    let importer = importer(source.clone());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = importer
        .run_cycle(store.as_ref(), &[asset(1, "btc"), asset(2, "eth")], &cancel)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("cancelled"));
    assert_eq!(source.windows_requested(2, "price_cap"), vec![TimeWindow::All]);
    assert_eq!(store.count("market.assets"), 0);
    assert_eq!(store.count("market.price_caps"), 0);
    assert_eq!(store.rollbacks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_deadline_rolls_back() {
    let store = MemoryStore::new();
    let source = scripted_source(&[1]);
    source.set_fault(1, Fault::Hang);
    let importer = Importer::new(
        source,
        ImportSettings { cycle_timeout: Duration::from_millis(50), ..fast_settings() },
    );

    let err = importer
        .run_cycle(store.as_ref(), &[asset(1, "btc")], &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(err.to_string().contains("timed out"));
    assert_eq!(store.count("market.assets"), 0);
}

#[tokio::test]
async fn test_empty_and_duplicate_asset_lists() {
    let store = MemoryStore::new();
    let source = scripted_source(&[1]);
    let importer = importer(source.clone());
    let cancel = CancellationToken::new();

    let summary = importer.run_cycle(store.as_ref(), &[], &cancel).await.unwrap();
    assert_eq!(summary.assets, 0);
    assert_eq!(store.commits.load(Ordering::SeqCst), 0);

    let summary = importer
        .run_cycle(store.as_ref(), &[asset(1, "btc"), asset(1, "btc")], &cancel)
        .await
        .unwrap();
    assert_eq!(summary.assets, 1);
    assert_eq!(source.windows_requested(1, "price_cap").len(), 3);
}

#[tokio::test]
async fn test_small_batches_commit_together() {
    let store = MemoryStore::new();
    let source = scripted_source(&[1]);
    // five rows of samples, two asset rows per statement
    let importer = importer(source).with_writer(UpsertWriter::with_max_bind_parameters(26));

    importer
        .run_cycle(store.as_ref(), &[asset(1, "btc")], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(store.price_caps(1).await.len(), 31);
    assert_eq!(store.concentrations(1).await.len(), 30);
    assert_eq!(store.commits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_cycles_serialize() {
    let store = MemoryStore::new();
    let source = scripted_source(&[1, 2]);
    let importer = importer(source);
    let cancel = CancellationToken::new();

    let assets_a = [asset(1, "btc")];
    let assets_b = [asset(2, "eth")];
    let (a, b) = tokio::join!(
        importer.run_cycle(store.as_ref(), &assets_a, &cancel),
        importer.run_cycle(store.as_ref(), &assets_b, &cancel),
    );
    a.unwrap();
    b.unwrap();

    // neither commit overwrote the other's snapshot
    assert_eq!(store.count("market.assets"), 2);
    assert!(store.checkpoint(1).await.is_some());
    assert!(store.checkpoint(2).await.is_some());
    assert_ne!(store.checkpoint(1).await, Some(ImportCheckpoint::new(1)));
}

#[tokio::test]
async fn test_repeated_points_in_one_window_keep_the_last() {
    let store = MemoryStore::new();
    let source = FakeSource::new();
    let ts = Utc::now() - ChronoDuration::days(1);
    source.set_price_caps(
        1,
        TimeWindow::Month,
        vec![price_cap(1, ts, 1.0), price_cap(1, ts, 2.0)],
    );
    source.set_concentrations(
        1,
        TimeWindow::Month,
        vec![concentration(1, days_ago(1), 30.0), concentration(1, days_ago(1), 31.0)],
    );
    let importer = importer(source);

    importer
        .run_cycle(store.as_ref(), &[asset(1, "btc")], &CancellationToken::new())
        .await
        .unwrap();

    let prices = store.price_caps(1).await;
    assert_eq!(prices.len(), 1);
    assert_eq!(prices[0].price, 2.0);
    let days = store.concentrations(1).await;
    assert_eq!(days.len(), 1);
    assert_eq!(days[0].whales, 31.0);
}
