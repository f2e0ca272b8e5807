use crate::network::types::Verdict;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one queue.
///
/// All counters are atomics so a reporting thread can read them while the
/// receive loop is running. Relaxed ordering is enough: each counter is
/// independent and only ever incremented.
#[derive(Debug, Default)]
pub struct QueueStats {
    received: AtomicU64,
    verdicts: [AtomicU64; 5],
    modified: AtomicU64,
    marked: AtomicU64,
    verdict_failures: AtomicU64,
    missed_verdicts: AtomicU64,
    malformed: AtomicU64,
    truncated: AtomicU64,
    overruns: AtomicU64,
}

/// Point-in-time copy of [`QueueStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Packet events handed to the callback
    pub received: u64,
    pub accepted: u64,
    pub dropped: u64,
    pub queued: u64,
    pub repeated: u64,
    pub stopped: u64,
    /// Verdicts that carried a replacement payload
    pub modified: u64,
    /// Verdicts that set a firewall mark
    pub marked: u64,
    /// Verdicts the kernel could not be told about
    pub verdict_failures: u64,
    /// Callbacks that returned without issuing a verdict
    pub missed_verdicts: u64,
    /// Messages that could not be decoded
    pub malformed: u64,
    /// Datagrams larger than the receive buffer
    pub truncated: u64,
    /// Times the kernel reported a socket buffer overrun
    pub overruns: u64,
}

fn slot(verdict: Verdict) -> usize {
    match verdict {
        Verdict::Drop => 0,
        Verdict::Accept => 1,
        Verdict::Queue => 2,
        Verdict::Repeat => 3,
        Verdict::Stop => 4,
    }
}

impl QueueStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a verdict the kernel accepted for sending.
    pub fn record_verdict(&self, verdict: Verdict, marked: bool, modified: bool) {
        self.verdicts[slot(verdict)].fetch_add(1, Ordering::Relaxed);
        if marked {
            self.marked.fetch_add(1, Ordering::Relaxed);
        }
        if modified {
            self.modified.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_verdict_failure(&self) {
        self.verdict_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_missed_verdict(&self) {
        self.missed_verdicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_truncated(&self) {
        self.truncated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of verdicts of one kind sent so far.
    pub fn verdicts(&self, verdict: Verdict) -> u64 {
        self.verdicts[slot(verdict)].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            received: load(&self.received),
            accepted: self.verdicts(Verdict::Accept),
            dropped: self.verdicts(Verdict::Drop),
            queued: self.verdicts(Verdict::Queue),
            repeated: self.verdicts(Verdict::Repeat),
            stopped: self.verdicts(Verdict::Stop),
            modified: load(&self.modified),
            marked: load(&self.marked),
            verdict_failures: load(&self.verdict_failures),
            missed_verdicts: load(&self.missed_verdicts),
            malformed: load(&self.malformed),
            truncated: load(&self.truncated),
            overruns: load(&self.overruns),
        }
    }
}

impl StatsSnapshot {
    /// Total verdicts successfully sent.
    pub fn verdicts_sent(&self) -> u64 {
        self.accepted + self.dropped + self.queued + self.repeated + self.stopped
    }

    /// Fraction of sent verdicts that dropped the packet.
    ///
    /// Returns 0.0 if no verdict has been sent.
    pub fn drop_rate(&self) -> f64 {
        let sent = self.verdicts_sent();
        if sent == 0 {
            return 0.0;
        }

        self.dropped as f64 / sent as f64
    }
}
