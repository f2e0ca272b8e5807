//! Trait definitions for the native queueing transport.
//!
//! The queue controller only talks to the kernel through these two traits,
//! which keeps the lifecycle and dispatch logic testable without
//! `CAP_NET_ADMIN`.

use crate::network::core::message::VerdictRequest;
use crate::network::types::CopyMode;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Opens native queue handles.
pub trait Transport {
    /// The handle type this transport produces
    type Handle: NativeHandle;

    /// Opens a new connection to the kernel queueing subsystem.
    fn open(&self) -> io::Result<Self::Handle>;
}

/// The path a packet envelope uses to hand its verdict back to the kernel.
///
/// Split from [`NativeHandle`] so an envelope can hold it as a trait object
/// without knowing the concrete transport.
pub trait VerdictSink {
    /// Sends one verdict. Never retried by callers.
    fn send_verdict(&self, request: &VerdictRequest<'_>) -> io::Result<()>;
}

/// An open connection to the kernel queueing subsystem.
///
/// Dropping the handle closes it. Handles are never cloned: exactly one
/// `Queue` owns each.
pub trait NativeHandle: VerdictSink + Send {
    /// Tells the kernel that `nfnetlink_queue` handles packets of `family`.
    fn bind_pf(&mut self, family: u16) -> io::Result<()>;

    /// Reverses [`bind_pf`](Self::bind_pf).
    fn unbind_pf(&mut self, family: u16) -> io::Result<()>;

    /// Binds this handle to queue `queue_num`.
    fn create_queue(&mut self, queue_num: u16) -> io::Result<()>;

    /// Releases queue `queue_num`.
    fn destroy_queue(&mut self, queue_num: u16) -> io::Result<()>;

    /// Sets how much of each packet is copied to userspace.
    fn set_mode(&mut self, queue_num: u16, mode: CopyMode, range: u32) -> io::Result<()>;

    /// Limits how many packets the kernel holds for this queue.
    fn set_queue_maxlen(&mut self, queue_num: u16, maxlen: u32) -> io::Result<()>;

    /// Resizes the socket receive buffer.
    fn set_buffer_size(&mut self, size: u32) -> io::Result<()>;

    /// Stops the kernel from reporting `ENOBUFS` when the buffer overruns.
    fn set_no_enobufs(&mut self, enable: bool) -> io::Result<()>;

    /// Bounds how long [`recv`](Self::recv) blocks. `None` blocks forever.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Returns the descriptor blocking reads are issued on.
    fn descriptor(&self) -> RawFd;

    /// Reads one datagram into the spare capacity of `buf`.
    ///
    /// Returns the full datagram size, which exceeds the bytes written when
    /// the datagram did not fit.
    fn recv(&mut self, buf: &mut Vec<u8>) -> io::Result<usize>;
}
