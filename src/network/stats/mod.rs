//! Statistics collected by a running queue.

pub mod queue_stats;

pub use queue_stats::{QueueStats, StatsSnapshot};
