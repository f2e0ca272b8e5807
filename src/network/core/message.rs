//! `nfnetlink_queue` wire format.
//!
//! Only the messages the verdict protocol needs are covered: queue
//! configuration, verdicts, and the packet events the kernel sends back.
//! Netlink and attribute headers are in host byte order; every integer inside
//! a queue attribute is big-endian.

use crate::network::types::{CopyMode, Verdict};
use thiserror::Error;

/// Size of `struct nlmsghdr`.
pub const NLMSG_HDRLEN: usize = 16;
const NFGENMSG_LEN: usize = 4;
const NLA_HDRLEN: usize = 4;
const NLA_TYPE_MASK: u16 = !(0x8000 | 0x4000);

const NLMSG_ERROR: u16 = 2;
const NLMSG_DONE: u16 = 3;

const NLM_F_REQUEST: u16 = 0x1;
const NLM_F_ACK: u16 = 0x4;

const NFNL_SUBSYS_QUEUE: u16 = 3;
const NFNETLINK_V0: u8 = 0;

const NFQNL_MSG_PACKET: u16 = 0;
const NFQNL_MSG_VERDICT: u16 = 1;
const NFQNL_MSG_CONFIG: u16 = 2;

const NFQA_PACKET_HDR: u16 = 1;
const NFQA_VERDICT_HDR: u16 = 2;
const NFQA_MARK: u16 = 3;
const NFQA_IFINDEX_INDEV: u16 = 5;
const NFQA_IFINDEX_OUTDEV: u16 = 6;
const NFQA_IFINDEX_PHYSINDEV: u16 = 7;
const NFQA_IFINDEX_PHYSOUTDEV: u16 = 8;
const NFQA_PAYLOAD: u16 = 10;
const NFQA_CAP_LEN: u16 = 13;

const NFQA_CFG_CMD: u16 = 1;
const NFQA_CFG_PARAMS: u16 = 2;
const NFQA_CFG_QUEUE_MAXLEN: u16 = 3;

/// Largest replacement payload that fits in a single netlink attribute.
pub const MAX_ATTR_PAYLOAD: usize = u16::MAX as usize - NLA_HDRLEN;

/// Errors decoding messages received from the kernel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// The header claims more bytes than the datagram holds
    #[error("message truncated: header claims {claimed} bytes, {available} available")]
    Truncated { claimed: usize, available: usize },

    /// The header length is smaller than the header itself
    #[error("message length {0} is shorter than its header")]
    BadLength(usize),

    /// An attribute length is out of bounds for its message or type
    #[error("attribute {kind} has invalid length {len}")]
    BadAttribute { kind: u16, len: usize },

    /// A packet event without `NFQA_PACKET_HDR` cannot be verdicted
    #[error("packet event carries no packet header")]
    MissingPacketHeader,
}

/// Queue configuration commands (`NFQNL_CFG_CMD_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigCommand {
    Bind = 1,
    Unbind = 2,
    PfBind = 3,
    PfUnbind = 4,
}

/// Contents of one verdict message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerdictRequest<'a> {
    pub queue_num: u16,
    pub packet_id: u32,
    pub verdict: Verdict,
    pub mark: Option<u32>,
    pub payload: Option<&'a [u8]>,
}

/// One packet event as delivered by the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PacketEvent<'a> {
    pub queue_num: u16,
    pub packet_id: u32,
    pub hw_protocol: u16,
    pub hook: u8,
    pub mark: u32,
    pub indev: u32,
    pub outdev: u32,
    pub physindev: u32,
    pub physoutdev: u32,
    pub cap_len: Option<u32>,
    pub payload: Option<&'a [u8]>,
}

/// A decoded netlink message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<'a> {
    Packet(PacketEvent<'a>),
    Ack { seq: u32 },
    Error { seq: u32, errno: i32 },
    Done,
    Other { kind: u16 },
}

#[inline]
fn align(len: usize) -> usize {
    (len + 3) & !3
}

#[inline]
fn subsys_type(msg: u16) -> u16 {
    (NFNL_SUBSYS_QUEUE << 8) | msg
}

struct MessageBuilder {
    buf: Vec<u8>,
}

impl MessageBuilder {
    fn new(msg: u16, flags: u16, seq: u32, res_id: u16) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&0u32.to_ne_bytes());
        buf.extend_from_slice(&subsys_type(msg).to_ne_bytes());
        buf.extend_from_slice(&flags.to_ne_bytes());
        buf.extend_from_slice(&seq.to_ne_bytes());
        // port id, filled in by the kernel
        buf.extend_from_slice(&0u32.to_ne_bytes());
        buf.push(libc::AF_UNSPEC as u8);
        buf.push(NFNETLINK_V0);
        buf.extend_from_slice(&res_id.to_be_bytes());
        Self { buf }
    }

    fn attr(mut self, kind: u16, value: &[u8]) -> Self {
        debug_assert!(value.len() <= MAX_ATTR_PAYLOAD);
        let len = NLA_HDRLEN + value.len();
        self.buf.extend_from_slice(&(len as u16).to_ne_bytes());
        self.buf.extend_from_slice(&kind.to_ne_bytes());
        self.buf.extend_from_slice(value);
        self.buf.resize(align(self.buf.len()), 0);
        self
    }

    fn attr_u32(self, kind: u16, value: u32) -> Self {
        self.attr(kind, &value.to_be_bytes())
    }

    fn finish(mut self) -> Vec<u8> {
        let len = self.buf.len() as u32;
        self.buf[..4].copy_from_slice(&len.to_ne_bytes());
        self.buf
    }
}

/// Builds an acknowledged configuration command.
///
/// `family` only matters for the protocol-family commands; queue bind and
/// unbind carry zero.
pub fn config_command(seq: u32, queue_num: u16, command: ConfigCommand, family: u16) -> Vec<u8> {
    let mut cmd = [0u8; 4];
    cmd[0] = command as u8;
    cmd[2..4].copy_from_slice(&family.to_be_bytes());

    MessageBuilder::new(NFQNL_MSG_CONFIG, NLM_F_REQUEST | NLM_F_ACK, seq, queue_num)
        .attr(NFQA_CFG_CMD, &cmd)
        .finish()
}

/// Builds the copy-mode message (`struct nfqnl_msg_config_params` is packed, 5 bytes).
pub fn config_params(seq: u32, queue_num: u16, mode: CopyMode, range: u32) -> Vec<u8> {
    let mut params = [0u8; 5];
    params[..4].copy_from_slice(&range.to_be_bytes());
    params[4] = mode.as_raw();

    MessageBuilder::new(NFQNL_MSG_CONFIG, NLM_F_REQUEST, seq, queue_num)
        .attr(NFQA_CFG_PARAMS, &params)
        .finish()
}

pub fn config_queue_maxlen(seq: u32, queue_num: u16, maxlen: u32) -> Vec<u8> {
    MessageBuilder::new(NFQNL_MSG_CONFIG, NLM_F_REQUEST, seq, queue_num)
        .attr_u32(NFQA_CFG_QUEUE_MAXLEN, maxlen)
        .finish()
}

/// Builds a verdict message, with the optional mark and replacement payload.
pub fn verdict(seq: u32, request: &VerdictRequest<'_>) -> Vec<u8> {
    let mut header = [0u8; 8];
    header[..4].copy_from_slice(&request.verdict.as_raw().to_be_bytes());
    header[4..].copy_from_slice(&request.packet_id.to_be_bytes());

    let mut builder = MessageBuilder::new(NFQNL_MSG_VERDICT, NLM_F_REQUEST, seq, request.queue_num)
        .attr(NFQA_VERDICT_HDR, &header);
    if let Some(mark) = request.mark {
        builder = builder.attr_u32(NFQA_MARK, mark);
    }
    if let Some(payload) = request.payload {
        builder = builder.attr(NFQA_PAYLOAD, payload);
    }
    builder.finish()
}

/// Iterates over the netlink messages packed into one datagram.
///
/// Iteration stops after the first error: once a length field is wrong the
/// rest of the datagram cannot be framed.
pub struct Messages<'a> {
    buf: &'a [u8],
}

impl<'a> Messages<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl<'a> Iterator for Messages<'a> {
    type Item = Result<Event<'a>, MessageError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() {
            return None;
        }

        let available = self.buf.len();
        if available < NLMSG_HDRLEN {
            self.buf = &[];
            return Some(Err(MessageError::Truncated {
                claimed: NLMSG_HDRLEN,
                available,
            }));
        }

        let len = read_ne_u32(&self.buf[0..4]) as usize;
        if len < NLMSG_HDRLEN {
            self.buf = &[];
            return Some(Err(MessageError::BadLength(len)));
        }
        if len > available {
            self.buf = &[];
            return Some(Err(MessageError::Truncated {
                claimed: len,
                available,
            }));
        }

        let message = &self.buf[..len];
        self.buf = &self.buf[align(len).min(available)..];
        Some(parse_message(message))
    }
}

fn read_ne_u32(bytes: &[u8]) -> u32 {
    u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn parse_message(message: &[u8]) -> Result<Event<'_>, MessageError> {
    let kind = u16::from_ne_bytes([message[4], message[5]]);
    let seq = read_ne_u32(&message[8..12]);
    let body = &message[NLMSG_HDRLEN..];

    match kind {
        NLMSG_ERROR => {
            if body.len() < 4 {
                return Err(MessageError::BadLength(message.len()));
            }
            let code = i32::from_ne_bytes([body[0], body[1], body[2], body[3]]);
            if code == 0 {
                Ok(Event::Ack { seq })
            } else {
                Ok(Event::Error { seq, errno: -code })
            }
        }
        NLMSG_DONE => Ok(Event::Done),
        k if k == subsys_type(NFQNL_MSG_PACKET) => parse_packet(body).map(Event::Packet),
        other => Ok(Event::Other { kind: other }),
    }
}

fn parse_packet(body: &[u8]) -> Result<PacketEvent<'_>, MessageError> {
    if body.len() < NFGENMSG_LEN {
        return Err(MessageError::BadLength(NLMSG_HDRLEN + body.len()));
    }

    let mut event = PacketEvent {
        queue_num: u16::from_be_bytes([body[2], body[3]]),
        ..Default::default()
    };
    let mut saw_header = false;

    for attr in Attributes::new(&body[NFGENMSG_LEN..]) {
        let (kind, value) = attr?;
        match kind {
            NFQA_PACKET_HDR => {
                if value.len() < 7 {
                    return Err(MessageError::BadAttribute {
                        kind,
                        len: value.len(),
                    });
                }
                event.packet_id = u32::from_be_bytes([value[0], value[1], value[2], value[3]]);
                event.hw_protocol = u16::from_be_bytes([value[4], value[5]]);
                event.hook = value[6];
                saw_header = true;
            }
            NFQA_MARK => event.mark = be_u32(kind, value)?,
            NFQA_IFINDEX_INDEV => event.indev = be_u32(kind, value)?,
            NFQA_IFINDEX_OUTDEV => event.outdev = be_u32(kind, value)?,
            NFQA_IFINDEX_PHYSINDEV => event.physindev = be_u32(kind, value)?,
            NFQA_IFINDEX_PHYSOUTDEV => event.physoutdev = be_u32(kind, value)?,
            NFQA_CAP_LEN => event.cap_len = Some(be_u32(kind, value)?),
            NFQA_PAYLOAD => event.payload = Some(value),
            _ => {}
        }
    }

    if !saw_header {
        return Err(MessageError::MissingPacketHeader);
    }
    Ok(event)
}

fn be_u32(kind: u16, value: &[u8]) -> Result<u32, MessageError> {
    if value.len() < 4 {
        return Err(MessageError::BadAttribute {
            kind,
            len: value.len(),
        });
    }
    Ok(u32::from_be_bytes([value[0], value[1], value[2], value[3]]))
}

struct Attributes<'a> {
    buf: &'a [u8],
}

impl<'a> Attributes<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl<'a> Iterator for Attributes<'a> {
    type Item = Result<(u16, &'a [u8]), MessageError>;

    fn next(&mut self) -> Option<Self::Item> {
        // Anything shorter than a header is trailing padding
        if self.buf.len() < NLA_HDRLEN {
            return None;
        }

        let len = u16::from_ne_bytes([self.buf[0], self.buf[1]]) as usize;
        let kind = u16::from_ne_bytes([self.buf[2], self.buf[3]]) & NLA_TYPE_MASK;
        if len < NLA_HDRLEN || len > self.buf.len() {
            self.buf = &[];
            return Some(Err(MessageError::BadAttribute { kind, len }));
        }

        let value = &self.buf[NLA_HDRLEN..len];
        self.buf = &self.buf[align(len).min(self.buf.len())..];
        Some(Ok((kind, value)))
    }
}

/// Encodes a packet event the way the kernel would; used by the fake transport.
#[cfg(test)]
pub(crate) fn encode_packet_event(seq: u32, event: &PacketEvent<'_>) -> Vec<u8> {
    let mut header = [0u8; 7];
    header[..4].copy_from_slice(&event.packet_id.to_be_bytes());
    header[4..6].copy_from_slice(&event.hw_protocol.to_be_bytes());
    header[6] = event.hook;

    let mut builder = MessageBuilder::new(NFQNL_MSG_PACKET, 0, seq, event.queue_num)
        .attr(NFQA_PACKET_HDR, &header);
    for (kind, value) in [
        (NFQA_MARK, event.mark),
        (NFQA_IFINDEX_INDEV, event.indev),
        (NFQA_IFINDEX_OUTDEV, event.outdev),
        (NFQA_IFINDEX_PHYSINDEV, event.physindev),
        (NFQA_IFINDEX_PHYSOUTDEV, event.physoutdev),
    ] {
        if value != 0 {
            builder = builder.attr_u32(kind, value);
        }
    }
    if let Some(cap_len) = event.cap_len {
        builder = builder.attr_u32(NFQA_CAP_LEN, cap_len);
    }
    if let Some(payload) = event.payload {
        builder = builder.attr(NFQA_PAYLOAD, payload);
    }
    builder.finish()
}

/// Encodes an `NLMSG_ERROR` reply; `errno == 0` makes it an ACK.
#[cfg(test)]
pub(crate) fn encode_error(seq: u32, errno: i32) -> Vec<u8> {
    let len = (NLMSG_HDRLEN + 4 + NLMSG_HDRLEN) as u32;
    let mut buf = Vec::with_capacity(len as usize);
    buf.extend_from_slice(&len.to_ne_bytes());
    buf.extend_from_slice(&NLMSG_ERROR.to_ne_bytes());
    buf.extend_from_slice(&0u16.to_ne_bytes());
    buf.extend_from_slice(&seq.to_ne_bytes());
    buf.extend_from_slice(&0u32.to_ne_bytes());
    buf.extend_from_slice(&(-errno).to_ne_bytes());
    // echo of the offending request header
    buf.extend_from_slice(&[0u8; NLMSG_HDRLEN]);
    buf
}
