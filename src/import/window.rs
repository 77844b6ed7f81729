use chrono::{DateTime, Duration, Utc};

use crate::source::TimeWindow;

/// A checkpoint older than this many days triggers a full-history fetch.
pub const FULL_HISTORY_AFTER_DAYS: i64 = 365;
/// A checkpoint older than this many days triggers a one-year fetch.
pub const YEAR_HISTORY_AFTER_DAYS: i64 = 31;

/// Windows to fetch for one stream, widest first.
///
/// A missing checkpoint fetches every window. The one-month window is always fetched so the
/// latest points are refreshed.
pub fn windows_to_fetch(now: DateTime<Utc>, checkpoint: Option<DateTime<Utc>>) -> Vec<TimeWindow> {
    let older_than = |days: i64| checkpoint.map_or(true, |ts| ts < now - Duration::days(days));

    let mut windows = Vec::with_capacity(3);
    if older_than(FULL_HISTORY_AFTER_DAYS) {
        windows.push(TimeWindow::All);
    }
    if older_than(YEAR_HISTORY_AFTER_DAYS) {
        windows.push(TimeWindow::Year);
    }
    windows.push(TimeWindow::Month);
    windows
}
