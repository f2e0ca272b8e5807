//! Core network functionality.
//!
//! The wire codec, the transport seam with its netlink implementation, and
//! the per-packet verdict envelope.

pub mod message;
pub mod netlink;
pub mod packet;
pub mod transport;

// Re-export commonly used types
pub use message::MessageError;
pub use netlink::{NetlinkHandle, NetlinkTransport};
pub use packet::Packet;
pub use transport::{NativeHandle, Transport, VerdictSink};
