use crate::network::processing::queue::{DEFAULT_COPY_RANGE, DEFAULT_RECV_BUFFER_SIZE};
use crate::network::types::{CopyMode, ProtocolFamily, Verdict};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a queue is attached and tuned.
///
/// Usable both as command line options (flattened into the harness CLI) and
/// as the `[queue]` table of a TOML config file. Missing fields take their
/// defaults.
#[derive(Parser, Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct QueueSettings {
    /// Number of the kernel queue to attach to
    #[arg(long = "queue", id = "queue-num", default_value_t = 0)]
    pub queue_num: u16,

    /// How much of each packet the kernel copies to userspace
    #[arg(long = "copy-mode", value_enum, default_value_t = CopyMode::Packet)]
    pub copy_mode: CopyMode,

    /// Maximum number of payload bytes copied per packet
    #[arg(long = "copy-range", default_value_t = DEFAULT_COPY_RANGE)]
    pub copy_range: u32,

    /// Protocol families to bind (repeat for several)
    #[arg(long = "family", value_enum, default_values_t = [ProtocolFamily::Inet])]
    pub families: Vec<ProtocolFamily>,

    /// Socket receive buffer size in bytes
    #[arg(long = "buffer-size")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<u32>,

    /// Maximum number of packets the kernel holds for the queue
    #[arg(long = "queue-maxlen")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_maxlen: Option<u32>,

    /// Don't report receive buffer overruns as errors
    #[arg(long = "no-enobufs")]
    pub no_enobufs: bool,

    /// Size of the buffer each datagram is read into
    #[arg(long = "recv-buffer", default_value_t = DEFAULT_RECV_BUFFER_SIZE)]
    pub recv_buffer_size: usize,

    /// How often the receive loop checks for a stop request in milliseconds (0 = block, Ctrl-C exits at once)
    #[arg(long = "poll-interval", default_value_t = 250)]
    pub poll_interval_ms: u64,

    /// Verdict applied when the callback returns without one
    #[arg(long = "fallback-verdict", value_enum)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_verdict: Option<Verdict>,
}

impl QueueSettings {
    pub fn poll_interval(&self) -> Option<Duration> {
        match self.poll_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            queue_num: 0,
            copy_mode: CopyMode::Packet,
            copy_range: DEFAULT_COPY_RANGE,
            families: vec![ProtocolFamily::Inet],
            buffer_size: None,
            queue_maxlen: None,
            no_enobufs: false,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            poll_interval_ms: 250,
            fallback_verdict: None,
        }
    }
}
