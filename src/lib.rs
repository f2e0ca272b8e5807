//! # nfgate - userspace verdicts for Linux netfilter queues
//!
//! nfgate attaches to a netfilter queue (`NFQUEUE` target) and hands every
//! queued packet to a callback, which decides what happens to it: accept,
//! drop, re-queue, repeat the hook, or stop traversal, optionally setting
//! the firewall mark or replacing the packet contents.
//!
//! The nfnetlink_queue protocol is spoken directly over a netlink socket,
//! so no C library is required.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nfgate::prelude::*;
//!
//! fn main() -> nfgate::Result<()> {
//!     let mut queue = Queue::new();
//!     queue.open()?;
//!     queue.set_callback(|packet| {
//!         let verdict = if packet.payload().len() > 1400 {
//!             Verdict::Drop
//!         } else {
//!             Verdict::Accept
//!         };
//!         if let Err(e) = packet.set_verdict(verdict) {
//!             eprintln!("verdict failed: {}", e);
//!         }
//!     });
//!     queue.bind(ProtocolFamily::Inet.as_raw())?;
//!     queue.create_queue(0)?;
//!     queue.run()
//! }
//! ```
//!
//! Packets reach the queue through a firewall rule such as
//! `iptables -A INPUT -j NFQUEUE --queue-num 0`. Opening the queue needs
//! `CAP_NET_ADMIN`.

/// Centralized error handling
pub mod error;
/// Netfilter queue protocol, controller and statistics
pub mod network;
/// Prelude for convenient imports
pub mod prelude;
/// Queue settings and config files
pub mod settings;
/// Shared utility functions
pub mod utils;

// Re-export commonly used types
pub use error::{NfqError, Result};
