//! Netlink transport for the kernel's `nfnetlink_queue` subsystem.
//!
//! Talks to the kernel over a `NETLINK_NETFILTER` socket directly, so no
//! native queueing library needs to be installed.

use crate::network::core::message::{self, ConfigCommand, Event, Messages, VerdictRequest};
use crate::network::core::transport::{NativeHandle, Transport, VerdictSink};
use crate::network::types::CopyMode;
use log::debug;
use netlink_sys::{protocols::NETLINK_NETFILTER, Socket, SocketAddr};
use std::cell::Cell;
use std::collections::VecDeque;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

/// Receive buffer used while waiting for a configuration ACK. Packets can
/// arrive first, so it holds a full-size packet datagram.
const ACK_BUFFER_SIZE: usize = 0xffff + 8192;

/// Opens [`NetlinkHandle`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetlinkTransport;

impl Transport for NetlinkTransport {
    type Handle = NetlinkHandle;

    fn open(&self) -> io::Result<NetlinkHandle> {
        let mut socket = Socket::new(NETLINK_NETFILTER)?;
        let local = socket.bind_auto()?;
        // Kernel is port 0
        socket.connect(&SocketAddr::new(0, 0))?;
        debug!(
            "Opened netfilter netlink socket (fd {}, port {})",
            socket.as_raw_fd(),
            local.port_number()
        );

        Ok(NetlinkHandle {
            socket,
            seq: Cell::new(1),
            pending: PendingDatagrams::default(),
        })
    }
}

/// An open `NETLINK_NETFILTER` socket.
///
/// The socket is closed when the handle is dropped.
pub struct NetlinkHandle {
    socket: Socket,
    seq: Cell<u32>,
    pending: PendingDatagrams,
}

impl NetlinkHandle {
    fn next_seq(&self) -> u32 {
        let seq = self.seq.get();
        self.seq.set(seq.wrapping_add(1));
        seq
    }

    fn send(&self, message: &[u8]) -> io::Result<()> {
        let sent = self.socket.send(message, 0)?;
        if sent != message.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short netlink send: {} of {} bytes", sent, message.len()),
            ));
        }
        Ok(())
    }

    /// Sends a configuration command and waits for the kernel's answer.
    fn command(&mut self, queue_num: u16, command: ConfigCommand, family: u16) -> io::Result<()> {
        let seq = self.next_seq();
        self.send(&message::config_command(seq, queue_num, command, family))?;

        let mut buf = Vec::with_capacity(ACK_BUFFER_SIZE);
        loop {
            buf.clear();
            let size = match self.socket.recv(&mut buf, libc::MSG_TRUNC) {
                Ok(size) => size,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            let scan = scan_for_ack(&buf, seq);
            if scan.packets > 0 {
                debug!(
                    "Keeping {} packet(s) that arrived while waiting for {:?} ack",
                    scan.packets, command
                );
                let datagram = std::mem::replace(&mut buf, Vec::with_capacity(ACK_BUFFER_SIZE));
                self.pending.push(datagram, size);
            }

            match scan.answer {
                Some(Ok(())) => return Ok(()),
                Some(Err(errno)) => return Err(io::Error::from_raw_os_error(errno)),
                None => {}
            }
        }
    }

    fn set_int_option(&self, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> io::Result<()> {
        // SAFETY: the pointer and length describe a live c_int for the duration of the call
        let rc = unsafe {
            libc::setsockopt(
                self.socket.as_raw_fd(),
                level,
                name,
                &value as *const libc::c_int as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl VerdictSink for NetlinkHandle {
    fn send_verdict(&self, request: &VerdictRequest<'_>) -> io::Result<()> {
        self.send(&message::verdict(self.next_seq(), request))
    }
}

impl NativeHandle for NetlinkHandle {
    fn bind_pf(&mut self, family: u16) -> io::Result<()> {
        self.command(0, ConfigCommand::PfBind, family)
    }

    fn unbind_pf(&mut self, family: u16) -> io::Result<()> {
        self.command(0, ConfigCommand::PfUnbind, family)
    }

    fn create_queue(&mut self, queue_num: u16) -> io::Result<()> {
        self.command(queue_num, ConfigCommand::Bind, 0)
    }

    fn destroy_queue(&mut self, queue_num: u16) -> io::Result<()> {
        self.command(queue_num, ConfigCommand::Unbind, 0)
    }

    fn set_mode(&mut self, queue_num: u16, mode: CopyMode, range: u32) -> io::Result<()> {
        let seq = self.next_seq();
        self.send(&message::config_params(seq, queue_num, mode, range))
    }

    fn set_queue_maxlen(&mut self, queue_num: u16, maxlen: u32) -> io::Result<()> {
        let seq = self.next_seq();
        self.send(&message::config_queue_maxlen(seq, queue_num, maxlen))
    }

    fn set_buffer_size(&mut self, size: u32) -> io::Result<()> {
        let size = libc::c_int::try_from(size).unwrap_or(libc::c_int::MAX);
        // SO_RCVBUFFORCE ignores rmem_max but needs CAP_NET_ADMIN
        match self.set_int_option(libc::SOL_SOCKET, libc::SO_RCVBUFFORCE, size) {
            Ok(()) => Ok(()),
            Err(_) => self.set_int_option(libc::SOL_SOCKET, libc::SO_RCVBUF, size),
        }
    }

    fn set_no_enobufs(&mut self, enable: bool) -> io::Result<()> {
        self.set_int_option(libc::SOL_NETLINK, libc::NETLINK_NO_ENOBUFS, enable as libc::c_int)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        // A zero timeval means "block forever", so clamp real timeouts to 1ms
        let timeout = timeout.map(|t| t.max(Duration::from_millis(1)));
        let tv = match timeout {
            Some(t) => libc::timeval {
                tv_sec: t.as_secs() as libc::time_t,
                tv_usec: t.subsec_micros() as libc::suseconds_t,
            },
            None => libc::timeval {
                tv_sec: 0,
                tv_usec: 0,
            },
        };
        // SAFETY: the pointer and length describe a live timeval for the duration of the call
        let rc = unsafe {
            libc::setsockopt(
                self.socket.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const libc::timeval as *const libc::c_void,
                std::mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn descriptor(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    fn recv(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        if let Some(size) = self.pending.pop_into(buf) {
            return Ok(size);
        }
        // MSG_TRUNC makes the kernel report the real datagram size
        self.socket.recv(buf, libc::MSG_TRUNC)
    }
}

impl Drop for NetlinkHandle {
    fn drop(&mut self) {
        debug!("Closing netfilter netlink socket (fd {})", self.socket.as_raw_fd());
    }
}

/// What one datagram says about configuration request `seq`.
#[derive(Debug, Default, PartialEq, Eq)]
struct AckScan {
    /// `Ok` for an ACK, `Err(errno)` for a rejection, `None` if the answer
    /// is not in this datagram
    answer: Option<Result<(), i32>>,
    /// Packet events the datagram carries
    packets: usize,
}

fn scan_for_ack(datagram: &[u8], seq: u32) -> AckScan {
    let mut scan = AckScan::default();

    for event in Messages::new(datagram) {
        match event {
            Ok(Event::Ack { seq: acked }) if acked == seq => scan.answer = Some(Ok(())),
            Ok(Event::Error { seq: failed, errno }) if failed == seq => {
                scan.answer = Some(Err(errno));
            }
            Ok(Event::Packet(_)) => scan.packets += 1,
            Ok(Event::Ack { seq: other }) => debug!("Ignoring stale ack for request {}", other),
            Ok(Event::Error { seq: other, errno }) => {
                debug!("Ignoring errno {} for earlier request {}", errno, other);
            }
            Ok(_) => {}
            Err(e) => {
                debug!("Skipping undecodable message while waiting for ack: {}", e);
                break;
            }
        }
    }

    scan
}

/// Packet datagrams read while waiting for an ACK, replayed by `recv` so
/// the receive loop still dispatches them.
#[derive(Debug, Default)]
struct PendingDatagrams {
    datagrams: VecDeque<(Vec<u8>, usize)>,
}

impl PendingDatagrams {
    fn push(&mut self, datagram: Vec<u8>, size: usize) {
        self.datagrams.push_back((datagram, size));
    }

    /// Copies the oldest datagram into the spare capacity of `buf` and
    /// returns its original size, like a `MSG_TRUNC` read.
    fn pop_into(&mut self, buf: &mut Vec<u8>) -> Option<usize> {
        let (datagram, size) = self.datagrams.pop_front()?;
        let room = buf.capacity() - buf.len();
        buf.extend_from_slice(&datagram[..datagram.len().min(room)]);
        Some(size)
    }
}
