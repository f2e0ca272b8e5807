//! Queue lifecycle and the packet receive loop.
//!
//! A [`Queue`] walks through `Uninitialized → Opened → Bound → QueueCreated →
//! Running → Closed`. Each step needs the previous ones; calling an operation
//! too early fails with [`NfqError::NotInitialized`].

use crate::error::{NfqError, Result};
use crate::network::core::message::{Event, MessageError, Messages, NLMSG_HDRLEN};
use crate::network::core::netlink::NetlinkTransport;
use crate::network::core::packet::Packet;
use crate::network::core::transport::{NativeHandle, Transport, VerdictSink};
use crate::network::processing::stop::StopHandle;
use crate::network::stats::QueueStats;
use crate::network::types::{CopyMode, Verdict};
use crate::settings::QueueSettings;
use log::{debug, error, info, warn};
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Largest IP packet; the default number of payload bytes copied.
pub const DEFAULT_COPY_RANGE: u32 = 0xffff;

/// Receive buffer large enough for a full packet plus netlink overhead.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 0xffff + 8192;

/// Application logic run for every packet. It must issue exactly one verdict.
pub type Callback = Box<dyn FnMut(&mut Packet<'_>) + Send>;

/// Lifecycle state of a [`Queue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Uninitialized,
    Opened,
    Bound,
    QueueCreated,
    Running,
    Closed,
}

/// The kernel queue a handle is bound to. Not `Clone`: one owner only.
#[derive(Debug)]
struct QueueBinding {
    num: u16,
}

/// A userspace endpoint of one kernel packet queue.
///
/// The queue owns its native handle and queue binding exclusively and
/// releases both on [`close`](Queue::close) or drop.
///
/// # Example
///
/// ```rust,ignore
/// use nfgate::prelude::*;
///
/// let mut queue = Queue::new();
/// queue.open()?;
/// queue.set_callback(|packet| {
///     let _ = packet.accept();
/// });
/// queue.bind(ProtocolFamily::Inet.as_raw())?;
/// queue.create_queue(0)?;
/// queue.run()?;
/// ```
pub struct Queue<T: Transport = NetlinkTransport> {
    transport: T,
    handle: Option<T::Handle>,
    binding: Option<QueueBinding>,
    callback: Option<Callback>,
    state: QueueState,
    copy_mode: CopyMode,
    copy_range: u32,
    recv_buffer_size: usize,
    poll_interval: Option<Duration>,
    fallback_verdict: Option<Verdict>,
    stats: Arc<QueueStats>,
    stop: StopHandle,
}

impl Queue<NetlinkTransport> {
    /// Creates an unopened queue on the kernel netlink transport.
    pub fn new() -> Self {
        Self::with_transport(NetlinkTransport)
    }

    /// Opens, binds, creates and tunes a queue as described by `settings`.
    pub fn from_settings<F>(settings: &QueueSettings, callback: F) -> Result<Self>
    where
        F: FnMut(&mut Packet<'_>) + Send + 'static,
    {
        Self::configure_with(NetlinkTransport, settings, callback)
    }
}

impl Default for Queue<NetlinkTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> Queue<T> {
    /// Creates an unopened queue on the given transport.
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            handle: None,
            binding: None,
            callback: None,
            state: QueueState::Uninitialized,
            copy_mode: CopyMode::default(),
            copy_range: DEFAULT_COPY_RANGE,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            poll_interval: None,
            fallback_verdict: None,
            stats: Arc::new(QueueStats::new()),
            stop: StopHandle::new(),
        }
    }

    /// Runs the whole setup sequence on `transport`.
    ///
    /// Unbind failures are logged and ignored, as a family that was never
    /// bound cannot be unbound. Any other failure is returned; the partially
    /// set up queue is closed on the way out.
    pub fn configure_with<F>(transport: T, settings: &QueueSettings, callback: F) -> Result<Self>
    where
        F: FnMut(&mut Packet<'_>) + Send + 'static,
    {
        let mut queue = Self::with_transport(transport);
        queue.set_recv_buffer_size(settings.recv_buffer_size);
        queue.open()?;
        queue.set_callback(callback);

        for family in &settings.families {
            if let Err(e) = queue.unbind(family.as_raw()) {
                warn!("Failed to unbind {} (usually harmless): {}", family, e);
            }
            queue.bind(family.as_raw())?;
        }

        queue.set_copy_range(settings.copy_range);
        queue.create_queue(settings.queue_num)?;
        queue.set_mode(settings.copy_mode)?;

        if let Some(size) = settings.buffer_size {
            queue.set_buffer_size(size);
        }
        if let Some(maxlen) = settings.queue_maxlen {
            queue.set_queue_maxlen(maxlen);
        }
        if settings.no_enobufs {
            queue.set_no_enobufs();
        }
        queue.set_poll_interval(settings.poll_interval());
        queue.set_fallback_verdict(settings.fallback_verdict);

        Ok(queue)
    }

    /// Opens the native handle.
    ///
    /// If a handle is already open, it will be closed first. Opening clears
    /// any stop request left over from a previous run.
    pub fn open(&mut self) -> Result<()> {
        if self.handle.is_some() {
            debug!("Queue already open, closing existing handle first");
            self.close();
        }

        match self.transport.open() {
            Ok(handle) => {
                info!("Opened netfilter queue handle");
                self.handle = Some(handle);
                self.state = QueueState::Opened;
                self.stop.reset();
                Ok(())
            }
            Err(e) => {
                error!("Failed to open netfilter queue handle: {}", e);
                Err(NfqError::OpenFailed(e))
            }
        }
    }

    /// Registers the function run for every packet, replacing any previous one.
    ///
    /// Must happen before [`create_queue`](Self::create_queue).
    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Packet<'_>) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    /// Tells the kernel that this subsystem queues packets of `family`
    /// (an `AF_*` value).
    ///
    /// Errors from the kernel are ignored: the binding may already be held by
    /// another process, which is harmless.
    pub fn bind(&mut self, family: u16) -> Result<()> {
        let handle = self
            .handle
            .as_mut()
            .ok_or(NfqError::NotInitialized("bind requires an open handle"))?;

        match handle.bind_pf(family) {
            Ok(()) => debug!("Bound protocol family {}", family),
            Err(e) => debug!("Ignoring bind error for protocol family {}: {}", family, e),
        }

        if self.state == QueueState::Opened {
            self.state = QueueState::Bound;
        }
        Ok(())
    }

    /// Unbinds the queue handler from `family`.
    ///
    /// Unlike [`bind`](Self::bind), kernel errors are returned.
    pub fn unbind(&mut self, family: u16) -> Result<()> {
        let handle = self
            .handle
            .as_mut()
            .ok_or(NfqError::NotInitialized("unbind requires an open handle"))?;

        handle
            .unbind_pf(family)
            .map_err(|e| NfqError::runtime("unbind protocol family", e))?;
        debug!("Unbound protocol family {}", family);
        Ok(())
    }

    /// Binds the handle to kernel queue `queue_num` and selects full-packet
    /// copy mode.
    pub fn create_queue(&mut self, queue_num: u16) -> Result<()> {
        let handle = self
            .handle
            .as_mut()
            .ok_or(NfqError::NotInitialized("create_queue requires an open handle"))?;
        if self.callback.is_none() {
            return Err(NfqError::NotInitialized("create_queue requires a callback"));
        }
        if let Some(existing) = &self.binding {
            return Err(NfqError::runtime(
                "create a second queue on one handle",
                io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("handle is already bound to queue {}", existing.num),
                ),
            ));
        }

        handle
            .create_queue(queue_num)
            .map_err(|e| NfqError::runtime("create queue", e))?;
        self.binding = Some(QueueBinding { num: queue_num });
        self.state = QueueState::QueueCreated;

        if let Err(e) = handle.set_mode(queue_num, CopyMode::Packet, self.copy_range) {
            warn!("Failed to set default copy mode on queue {}: {}", queue_num, e);
        }
        self.copy_mode = CopyMode::Packet;

        info!("Created queue {}", queue_num);
        Ok(())
    }

    /// Sets how much of each packet the kernel copies to userspace.
    pub fn set_mode(&mut self, mode: CopyMode) -> Result<()> {
        let handle = self
            .handle
            .as_mut()
            .ok_or(NfqError::NotInitialized("set_mode requires an open handle"))?;
        let binding = self
            .binding
            .as_ref()
            .ok_or(NfqError::NotInitialized("set_mode requires a created queue"))?;

        handle
            .set_mode(binding.num, mode, self.copy_range)
            .map_err(|e| NfqError::runtime("set copy mode", e))?;
        self.copy_mode = mode;

        debug!("Queue {} copy mode set to {} (range {})", binding.num, mode, self.copy_range);
        Ok(())
    }

    /// Sets how many payload bytes are copied per packet. Takes effect on the
    /// next [`set_mode`](Self::set_mode) or [`create_queue`](Self::create_queue).
    pub fn set_copy_range(&mut self, range: u32) {
        self.copy_range = range;
    }

    /// Resizes the socket receive buffer. Best-effort.
    pub fn set_buffer_size(&mut self, size: u32) {
        match self.handle.as_mut() {
            Some(handle) => match handle.set_buffer_size(size) {
                Ok(()) => debug!("Socket receive buffer set to {} bytes", size),
                Err(e) => warn!("Failed to set socket receive buffer to {} bytes: {}", size, e),
            },
            None => warn!("Cannot set receive buffer size: queue not open"),
        }
    }

    /// Limits how many packets the kernel holds for this queue. Best-effort.
    pub fn set_queue_maxlen(&mut self, maxlen: u32) {
        match (self.handle.as_mut(), self.binding.as_ref()) {
            (Some(handle), Some(binding)) => match handle.set_queue_maxlen(binding.num, maxlen) {
                Ok(()) => debug!("Queue {} max length set to {}", binding.num, maxlen),
                Err(e) => warn!("Failed to set queue {} max length: {}", binding.num, e),
            },
            _ => warn!("Cannot set queue max length: queue not created"),
        }
    }

    /// Stops the kernel from reporting buffer overruns as `ENOBUFS`.
    /// Best-effort.
    pub fn set_no_enobufs(&mut self) {
        match self.handle.as_mut() {
            Some(handle) => {
                if let Err(e) = handle.set_no_enobufs(true) {
                    warn!("Failed to disable ENOBUFS reporting: {}", e);
                }
            }
            None => warn!("Cannot disable ENOBUFS reporting: queue not open"),
        }
    }

    /// Bounds each blocking read so the loop can notice a stop request
    /// while no packets arrive. `None` blocks until traffic arrives.
    pub fn set_poll_interval(&mut self, interval: Option<Duration>) {
        self.poll_interval = interval;
    }

    /// Verdict issued on behalf of a callback that returns without one.
    pub fn set_fallback_verdict(&mut self, verdict: Option<Verdict>) {
        self.fallback_verdict = verdict;
    }

    /// Sets the size of the buffer datagrams are read into.
    pub fn set_recv_buffer_size(&mut self, size: usize) {
        self.recv_buffer_size = size.max(NLMSG_HDRLEN);
    }

    /// Returns a handle that can stop [`run`](Self::run) from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Returns the counters updated by the receive loop.
    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Number of the kernel queue, once created.
    pub fn queue_num(&self) -> Option<u16> {
        self.binding.as_ref().map(|binding| binding.num)
    }

    pub fn copy_mode(&self) -> CopyMode {
        self.copy_mode
    }

    /// Receives packets and dispatches them to the callback until a stop is
    /// requested or a fatal read error occurs.
    ///
    /// Packets are handled one at a time, in kernel order; the callback for
    /// one packet returns before the next read is issued.
    ///
    /// A stop request stays set after `run` returns, so calling `run` again
    /// returns `Ok(())` at once. Only [`open`](Self::open) clears it; call
    /// [`StopHandle::reset`] to resume on the same handle.
    pub fn run(&mut self) -> Result<()> {
        let handle = self
            .handle
            .as_mut()
            .ok_or(NfqError::NotInitialized("run requires an open handle"))?;
        let queue_num = self
            .binding
            .as_ref()
            .map(|binding| binding.num)
            .ok_or(NfqError::NotInitialized("run requires a created queue"))?;
        let callback = self
            .callback
            .as_mut()
            .ok_or(NfqError::NotInitialized("run requires a callback"))?;

        let fd = handle.descriptor();
        if fd < 0 {
            return Err(NfqError::runtime(
                "get queue descriptor",
                io::Error::from_raw_os_error(libc::EBADF),
            ));
        }
        handle
            .set_read_timeout(self.poll_interval)
            .map_err(|e| NfqError::runtime("set read timeout", e))?;

        let dispatch = Dispatch {
            queue_num,
            copy_mode: self.copy_mode,
            fallback: self.fallback_verdict,
            stats: &self.stats,
        };

        info!("Queue {} running (fd {}, copy mode {})", queue_num, fd, self.copy_mode);
        self.state = QueueState::Running;
        let result = receive_loop(handle, callback, &dispatch, &self.stop, self.recv_buffer_size);
        self.state = QueueState::QueueCreated;

        match &result {
            Ok(()) => info!("Queue {} stopped", queue_num),
            Err(e) => error!("Queue {} receive loop failed: {}", queue_num, e),
        }
        result
    }

    /// Releases the queue binding and the native handle.
    ///
    /// Safe to call in any state and any number of times; the queue can be
    /// opened again afterwards. The callback stays registered.
    pub fn close(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            if let Some(binding) = self.binding.take() {
                match handle.destroy_queue(binding.num) {
                    Ok(()) => debug!("Destroyed queue {}", binding.num),
                    Err(e) => warn!("Failed to destroy queue {}: {}", binding.num, e),
                }
            }
            drop(handle);
            info!("Closed netfilter queue handle");
        }

        self.binding = None;
        self.state = QueueState::Closed;
    }
}

impl<T: Transport> Drop for Queue<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Per-run values the dispatcher needs besides the handle and callback.
struct Dispatch<'q> {
    queue_num: u16,
    copy_mode: CopyMode,
    fallback: Option<Verdict>,
    stats: &'q QueueStats,
}

fn receive_loop<H: NativeHandle>(
    handle: &mut H,
    callback: &mut Callback,
    dispatch: &Dispatch<'_>,
    stop: &StopHandle,
    buffer_size: usize,
) -> Result<()> {
    let mut buf = Vec::with_capacity(buffer_size);

    while !stop.is_stop_requested() {
        buf.clear();
        let size = match handle.recv(&mut buf) {
            Ok(size) => size,
            Err(e) if e.raw_os_error() == Some(libc::ENOBUFS) => {
                warn!("Kernel dropped packets: socket receive buffer overrun");
                dispatch.stats.record_overrun();
                continue;
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                continue;
            }
            Err(e) => return Err(NfqError::runtime("read from queue", e)),
        };

        if size == 0 {
            debug!("Queue socket returned end of stream");
            return Ok(());
        }

        let truncated = size > buf.len();
        if truncated {
            warn!(
                "Datagram of {} bytes truncated to {}; increase the receive buffer",
                size,
                buf.len()
            );
            dispatch.stats.record_truncated();
        }

        dispatch_datagram(&*handle, callback, &buf, truncated, dispatch);
    }

    Ok(())
}

fn dispatch_datagram(
    sink: &dyn VerdictSink,
    callback: &mut Callback,
    datagram: &[u8],
    truncated: bool,
    dispatch: &Dispatch<'_>,
) {
    for message in Messages::new(datagram) {
        match message {
            Ok(Event::Packet(event)) => {
                if event.queue_num != dispatch.queue_num {
                    debug!(
                        "Skipping packet {} for queue {} (this is queue {})",
                        event.packet_id, event.queue_num, dispatch.queue_num
                    );
                    continue;
                }

                dispatch.stats.record_received();
                let mut packet = Packet::new(sink, dispatch.stats, &event, dispatch.copy_mode);
                callback(&mut packet);

                if !packet.has_verdict() {
                    settle_missed_verdict(&mut packet, dispatch);
                }
            }
            Ok(Event::Error { seq, errno }) => {
                warn!(
                    "Kernel rejected request {}: {}",
                    seq,
                    io::Error::from_raw_os_error(errno)
                );
            }
            Ok(_) => {}
            Err(MessageError::Truncated { claimed, available }) if truncated => {
                debug!(
                    "Discarding partial message ({} of {} bytes) at end of truncated datagram",
                    available, claimed
                );
            }
            Err(e) => {
                warn!("Discarding rest of datagram: {}", e);
                dispatch.stats.record_malformed();
            }
        }
    }
}

fn settle_missed_verdict(packet: &mut Packet<'_>, dispatch: &Dispatch<'_>) {
    dispatch.stats.record_missed_verdict();

    match dispatch.fallback {
        Some(verdict) => {
            warn!(
                "Callback returned without a verdict for packet {}, applying fallback '{}'",
                packet.id(),
                verdict
            );
            if let Err(e) = packet.set_verdict(verdict) {
                error!("Fallback verdict for packet {} failed: {}", packet.id(), e);
            }
        }
        None => error!(
            "Callback returned without a verdict for packet {}; it stays queued in the kernel",
            packet.id()
        ),
    }
}
