//! Shared utility functions.

use crate::network::stats::StatsSnapshot;
use log::{info, warn};

/// Logs queue statistics including received count, verdicts sent, and drop percentage.
///
/// Anomalies (failed or missing verdicts, malformed or truncated messages,
/// buffer overruns) are logged as a warning when any occurred.
///
/// # Arguments
///
/// * `stats` - Snapshot of the queue counters
pub fn log_statistics(stats: &StatsSnapshot) {
    info!(
        "Received Packets: {}, Accepted: {}, Dropped: {} - {:.2}%, Marked: {}, Modified: {}",
        stats.received,
        stats.accepted,
        stats.dropped,
        stats.drop_rate() * 100.0,
        stats.marked,
        stats.modified
    );

    if has_anomalies(stats) {
        warn!(
            "Failed verdicts: {}, Missed verdicts: {}, Malformed: {}, Truncated: {}, Overruns: {}",
            stats.verdict_failures,
            stats.missed_verdicts,
            stats.malformed,
            stats.truncated,
            stats.overruns
        );
    }
}

fn has_anomalies(stats: &StatsSnapshot) -> bool {
    stats.verdict_failures + stats.missed_verdicts + stats.malformed + stats.truncated + stats.overruns
        > 0
}
