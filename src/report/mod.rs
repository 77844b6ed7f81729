//! Decline detection over stored history. Pure: no I/O and no locks.

pub mod decline;
pub mod ranking;

pub use decline::{day_average, detect_decline, find_decline, DeclineParams, DeclineReport, ValueChange};
pub use ranking::{effective_limit, rank_biggest, rank_longest, DEFAULT_REPORT_LIMIT};
