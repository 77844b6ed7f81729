use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::db::models::{ConcentrationSample, PriceCapSample};

/// Scan limits of the decline detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeclineParams {
    /// Samples older than `now - max_lookback` are ignored
    pub max_lookback: Duration,
    /// Longest tolerated distance between the decline start and the next older sample
    pub max_gap: Duration,
}

impl Default for DeclineParams {
    fn default() -> Self {
        Self {
            max_lookback: Duration::days(61),
            max_gap: Duration::days(5),
        }
    }
}

/// Start and end value of one metric over a decline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValueChange {
    pub from: f64,
    pub to: f64,
    /// `from - to`, positive for a drop
    pub change: f64,
    /// `to * 100 / from` rounded to two decimals; `None` when `from` is zero
    pub percent: Option<f64>,
}

impl ValueChange {
    pub fn new(from: f64, to: f64) -> Self {
        let percent = if from == 0.0 { None } else { Some(round2(to * 100.0 / from)) };
        Self { from, to, change: from - to, percent }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

mod duration_days {
    use chrono::Duration;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_days())
    }
}

/// The most recent sustained drop of the whale share of one asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeclineReport {
    pub asset_id: i64,
    pub symbol: String,
    pub day_from: NaiveDate,
    pub day_to: NaiveDate,
    #[serde(rename = "duration_days", with = "duration_days")]
    pub duration: Duration,
    pub whales: ValueChange,
    /// Empty when either day has no price/cap samples
    pub cap: Option<ValueChange>,
    pub price: Option<ValueChange>,
}

/// Price and cap averaged over one day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DayAverage {
    pub price: f64,
    pub cap: f64,
}

/// Mean of the samples with `day_start <= ts < day_start + 24h`.
pub fn day_average(samples: &[PriceCapSample], day: NaiveDate) -> Option<DayAverage> {
    let start = day.and_hms_opt(0, 0, 0)?.and_utc();
    let end = start + Duration::days(1);

    let (count, price, cap) = samples
        .iter()
        .filter(|s| s.ts >= start && s.ts < end)
        .fold((0usize, 0.0, 0.0), |(n, p, c), s| (n + 1, p + s.price, c + s.cap));

    if count == 0 {
        return None;
    }
    Some(DayAverage {
        price: price / count as f64,
        cap: cap / count as f64,
    })
}

/// Finds the most recent decline in `concentrations` (sorted by day, newest first).
///
/// The end of the decline follows the scan until the first older sample with a higher whale
/// share; from then on every older sample with a share above the end's extends the start
/// backwards. The scan stops at the lookback boundary, or when the next older sample lies more
/// than `max_gap` before the current start.
pub fn find_decline<'a>(
    concentrations: &'a [ConcentrationSample],
    now: DateTime<Utc>,
    params: &DeclineParams,
) -> Option<(&'a ConcentrationSample, &'a ConcentrationSample)> {
    let cutoff = now - params.max_lookback;
    let mut end: Option<&ConcentrationSample> = None;
    let mut start: Option<&ConcentrationSample> = None;

    for sample in concentrations {
        if sample.day_start() < cutoff {
            break;
        }
        let Some(current_end) = end else {
            end = Some(sample);
            continue;
        };

        if let Some(current_start) = start {
            if current_start.day - sample.day > params.max_gap {
                break;
            }
        }

        if sample.whales > current_end.whales {
            start = Some(sample);
        } else if start.is_none() {
            end = Some(sample);
        }
    }

    Some((start?, end?))
}

/// Builds the decline report of one asset, or `None` when its history shows no decline.
pub fn detect_decline(
    asset_id: i64,
    symbol: &str,
    concentrations: &[ConcentrationSample],
    price_caps: &[PriceCapSample],
    now: DateTime<Utc>,
    params: &DeclineParams,
) -> Option<DeclineReport> {
    let (from, to) = find_decline(concentrations, now, params)?;

    let averages = day_average(price_caps, from.day).zip(day_average(price_caps, to.day));

    Some(DeclineReport {
        asset_id,
        symbol: symbol.to_string(),
        day_from: from.day,
        day_to: to.day,
        duration: to.day - from.day,
        whales: ValueChange::new(from.whales, to.whales),
        cap: averages.map(|(f, t)| ValueChange::new(f.cap, t.cap)),
        price: averages.map(|(f, t)| ValueChange::new(f.price, t.price)),
    })
}
