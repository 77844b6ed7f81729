use std::cmp::Ordering;

use crate::report::decline::DeclineReport;

pub const DEFAULT_REPORT_LIMIT: usize = 10;

/// Limit to apply when the caller omits one or passes zero.
pub fn effective_limit(limit: Option<usize>) -> usize {
    match limit {
        Some(n) if n > 0 => n,
        _ => DEFAULT_REPORT_LIMIT,
    }
}

/// Largest whale-share drop first. Ties keep their input order.
pub fn rank_biggest(mut reports: Vec<DeclineReport>, limit: Option<usize>) -> Vec<DeclineReport> {
    reports.sort_by(|a, b| {
        b.whales
            .change
            .partial_cmp(&a.whales.change)
            .unwrap_or(Ordering::Equal)
    });
    reports.truncate(effective_limit(limit));
    reports
}

/// Longest decline first. Ties keep their input order.
pub fn rank_longest(mut reports: Vec<DeclineReport>, limit: Option<usize>) -> Vec<DeclineReport> {
    reports.sort_by(|a, b| b.duration.cmp(&a.duration));
    reports.truncate(effective_limit(limit));
    reports
}
