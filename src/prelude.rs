//! Prelude module for convenient imports.
//!
//! This module re-exports commonly used types from the crate, allowing users
//! to import everything they need with a single use statement:
//!
//! ```rust
//! use nfgate::prelude::*;
//! ```

// Error handling
pub use crate::error::{NfqError, Result};

// Queue controller
pub use crate::network::core::{NativeHandle, NetlinkTransport, Packet, Transport, VerdictSink};
pub use crate::network::processing::{Callback, Queue, QueueState, StopHandle};

// Statistics
pub use crate::network::stats::{QueueStats, StatsSnapshot};

// Protocol constants
pub use crate::network::types::{CopyMode, ProtocolFamily, Verdict};

// Settings
pub use crate::settings::{DropRate, QueueSettings};
