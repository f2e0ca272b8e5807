//! Scripted stand-ins for the kernel, used by unit tests.

use crate::network::core::message::{encode_error, encode_packet_event, PacketEvent, VerdictRequest};
use crate::network::core::transport::{NativeHandle, Transport, VerdictSink};
use crate::network::types::{CopyMode, Verdict};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A verdict as the fake kernel saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedVerdict {
    pub queue_num: u16,
    pub packet_id: u32,
    pub verdict: Verdict,
    pub mark: Option<u32>,
    pub payload: Option<Vec<u8>>,
}

impl From<&VerdictRequest<'_>> for RecordedVerdict {
    fn from(request: &VerdictRequest<'_>) -> Self {
        Self {
            queue_num: request.queue_num,
            packet_id: request.packet_id,
            verdict: request.verdict,
            mark: request.mark,
            payload: request.payload.map(<[u8]>::to_vec),
        }
    }
}

/// Verdict sink that records every request.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<RecordedVerdict>>,
    attempts: Mutex<usize>,
    fail: bool,
}

impl RecordingSink {
    /// A sink whose every send fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<RecordedVerdict> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

impl VerdictSink for RecordingSink {
    fn send_verdict(&self, request: &VerdictRequest<'_>) -> io::Result<()> {
        *self.attempts.lock().unwrap() += 1;
        if self.fail {
            return Err(io::Error::from_raw_os_error(libc::ENOBUFS));
        }
        self.sent.lock().unwrap().push(request.into());
        Ok(())
    }
}

/// One scripted result of `recv`.
pub enum ScriptedRead {
    /// A datagram delivered whole
    Datagram(Vec<u8>),
    /// A datagram whose real size was larger than the bytes delivered
    Truncated { data: Vec<u8>, reported: usize },
    /// A read failing with a raw OS error
    Error(i32),
}

/// Everything the fake kernel observed, plus knobs to make calls fail.
pub struct FakeState {
    pub opens: usize,
    pub closes: usize,
    pub bound: Vec<u16>,
    pub unbound: Vec<u16>,
    pub created: Vec<u16>,
    pub destroyed: Vec<u16>,
    pub modes: Vec<(u16, CopyMode, u32)>,
    pub maxlen: Option<u32>,
    pub buffer_size: Option<u32>,
    pub no_enobufs: Option<bool>,
    pub read_timeout: Option<Option<Duration>>,
    pub verdicts: Vec<RecordedVerdict>,
    pub reads: VecDeque<ScriptedRead>,
    pub descriptor: RawFd,
    pub fail_open: bool,
    pub fail_bind: bool,
    pub fail_unbind: bool,
    pub fail_create: bool,
    pub fail_verdict: bool,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            opens: 0,
            closes: 0,
            bound: Vec::new(),
            unbound: Vec::new(),
            created: Vec::new(),
            destroyed: Vec::new(),
            modes: Vec::new(),
            maxlen: None,
            buffer_size: None,
            no_enobufs: None,
            read_timeout: None,
            verdicts: Vec::new(),
            reads: VecDeque::new(),
            descriptor: 3,
            fail_open: false,
            fail_bind: false,
            fail_unbind: false,
            fail_create: false,
            fail_verdict: false,
        }
    }
}

/// Transport backed by shared [`FakeState`].
///
/// Clones share the state, so a test keeps one clone to script reads and
/// inspect what the queue did with the other.
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with the shared state locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    /// Scripts one datagram holding a single packet event.
    pub fn push_packet(&self, event: &PacketEvent<'_>) {
        let datagram = encode_packet_event(0, event);
        self.push_read(ScriptedRead::Datagram(datagram));
    }

    /// Scripts one datagram holding an `NLMSG_ERROR` reply.
    pub fn push_error_reply(&self, seq: u32, errno: i32) {
        self.push_read(ScriptedRead::Datagram(encode_error(seq, errno)));
    }

    pub fn push_read(&self, read: ScriptedRead) {
        self.with(|state| state.reads.push_back(read));
    }

    /// Number of verdicts the fake kernel received per packet ID.
    pub fn verdict_counts(&self) -> HashMap<u32, usize> {
        self.with(|state| {
            let mut counts = HashMap::new();
            for verdict in &state.verdicts {
                *counts.entry(verdict.packet_id).or_insert(0) += 1;
            }
            counts
        })
    }

    pub fn verdicts(&self) -> Vec<RecordedVerdict> {
        self.with(|state| state.verdicts.clone())
    }
}

impl Transport for FakeTransport {
    type Handle = FakeHandle;

    fn open(&self) -> io::Result<FakeHandle> {
        self.with(|state| {
            if state.fail_open {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            state.opens += 1;
            Ok(FakeHandle {
                state: Arc::clone(&self.state),
            })
        })
    }
}

pub struct FakeHandle {
    state: Arc<Mutex<FakeState>>,
}

impl FakeHandle {
    fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }
}

fn refused() -> io::Error {
    io::Error::from_raw_os_error(libc::EPERM)
}

impl VerdictSink for FakeHandle {
    fn send_verdict(&self, request: &VerdictRequest<'_>) -> io::Result<()> {
        self.with(|state| {
            if state.fail_verdict {
                return Err(refused());
            }
            state.verdicts.push(request.into());
            Ok(())
        })
    }
}

impl NativeHandle for FakeHandle {
    fn bind_pf(&mut self, family: u16) -> io::Result<()> {
        self.with(|state| {
            if state.fail_bind {
                return Err(refused());
            }
            state.bound.push(family);
            Ok(())
        })
    }

    fn unbind_pf(&mut self, family: u16) -> io::Result<()> {
        self.with(|state| {
            if state.fail_unbind {
                return Err(refused());
            }
            state.unbound.push(family);
            Ok(())
        })
    }

    fn create_queue(&mut self, queue_num: u16) -> io::Result<()> {
        self.with(|state| {
            if state.fail_create {
                return Err(io::Error::from_raw_os_error(libc::EBUSY));
            }
            state.created.push(queue_num);
            Ok(())
        })
    }

    fn destroy_queue(&mut self, queue_num: u16) -> io::Result<()> {
        self.with(|state| state.destroyed.push(queue_num));
        Ok(())
    }

    fn set_mode(&mut self, queue_num: u16, mode: CopyMode, range: u32) -> io::Result<()> {
        self.with(|state| state.modes.push((queue_num, mode, range)));
        Ok(())
    }

    fn set_queue_maxlen(&mut self, _queue_num: u16, maxlen: u32) -> io::Result<()> {
        self.with(|state| state.maxlen = Some(maxlen));
        Ok(())
    }

    fn set_buffer_size(&mut self, size: u32) -> io::Result<()> {
        self.with(|state| state.buffer_size = Some(size));
        Ok(())
    }

    fn set_no_enobufs(&mut self, enable: bool) -> io::Result<()> {
        self.with(|state| state.no_enobufs = Some(enable));
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.with(|state| state.read_timeout = Some(timeout));
        Ok(())
    }

    fn descriptor(&self) -> RawFd {
        self.with(|state| state.descriptor)
    }

    fn recv(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        let read = self.with(|state| state.reads.pop_front());
        match read {
            Some(ScriptedRead::Datagram(data)) => {
                buf.extend_from_slice(&data);
                Ok(data.len())
            }
            Some(ScriptedRead::Truncated { data, reported }) => {
                buf.extend_from_slice(&data);
                Ok(reported)
            }
            Some(ScriptedRead::Error(code)) => Err(io::Error::from_raw_os_error(code)),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "no more scripted reads",
            )),
        }
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.closes += 1;
        }
    }
}
