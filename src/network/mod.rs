//! Netfilter queue access.
//!
//! `core` speaks the nfnetlink_queue protocol, `processing` drives the queue
//! lifecycle and receive loop, and `stats` counts what happened.

pub mod core;
pub mod processing;
pub mod stats;
pub mod types;

#[cfg(test)]
pub mod testing;
