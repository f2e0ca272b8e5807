use serde::{Deserialize, Serialize};
use std::fmt;

/// Disposition decision for a queued packet.
///
/// The variants map one-to-one onto the kernel's `NF_*` verdict codes.
/// `NF_STOLEN` has no variant: userspace cannot steal a packet.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Discard the packet
    Drop,
    /// Let the packet continue through the ruleset
    Accept,
    /// Hand the packet to queue 0 again
    Queue,
    /// Re-run the current hook for this packet
    Repeat,
    /// Accept the packet and skip the remaining hooks
    Stop,
}

impl Verdict {
    /// Returns the kernel verdict code (`NF_DROP`, `NF_ACCEPT`, ...).
    pub const fn as_raw(self) -> u32 {
        match self {
            Verdict::Drop => 0,
            Verdict::Accept => 1,
            Verdict::Queue => 3,
            Verdict::Repeat => 4,
            Verdict::Stop => 5,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verdict::Drop => "drop",
            Verdict::Accept => "accept",
            Verdict::Queue => "queue",
            Verdict::Repeat => "repeat",
            Verdict::Stop => "stop",
        };
        f.write_str(name)
    }
}
