use crate::error::{NfqError, Result};
use crate::network::core::message::{PacketEvent, VerdictRequest, MAX_ATTR_PAYLOAD};
use crate::network::core::transport::VerdictSink;
use crate::network::stats::QueueStats;
use crate::network::types::{CopyMode, Verdict};
use log::error;
use std::fmt;

/// A queued packet waiting for its verdict.
///
/// A `Packet` only lives for one callback invocation: the callback receives
/// `&mut Packet<'_>` and the borrow ends when it returns. Exactly one of the
/// `set_verdict*` methods must be called; further calls are rejected with
/// [`NfqError::VerdictAlreadyIssued`] and never reach the kernel.
pub struct Packet<'a> {
    sink: &'a dyn VerdictSink,
    stats: &'a QueueStats,
    queue_num: u16,
    id: u32,
    hw_protocol: u16,
    hook: u8,
    mark: u32,
    indev: u32,
    outdev: u32,
    physindev: u32,
    physoutdev: u32,
    cap_len: Option<u32>,
    payload: &'a [u8],
    verdict: Option<Verdict>,
}

impl<'a> Packet<'a> {
    /// Builds the envelope for one event.
    ///
    /// The payload is only exposed when `mode` copies it; in metadata mode it
    /// is empty whatever the event carries.
    pub(crate) fn new(
        sink: &'a dyn VerdictSink,
        stats: &'a QueueStats,
        event: &PacketEvent<'a>,
        mode: CopyMode,
    ) -> Self {
        let payload = match (mode.copies_payload(), event.payload) {
            (true, Some(payload)) => payload,
            _ => &[],
        };

        Self {
            sink,
            stats,
            queue_num: event.queue_num,
            id: event.packet_id,
            hw_protocol: event.hw_protocol,
            hook: event.hook,
            mark: event.mark,
            indev: event.indev,
            outdev: event.outdev,
            physindev: event.physindev,
            physoutdev: event.physoutdev,
            cap_len: event.cap_len,
            payload,
            verdict: None,
        }
    }

    /// Queue-assigned packet ID.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Number of the queue the packet arrived on.
    #[inline]
    pub fn queue_num(&self) -> u16 {
        self.queue_num
    }

    /// Packet data, starting at the network layer header. Empty unless the
    /// queue copies full packets.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        self.payload
    }

    /// Firewall mark (fwmark) of the packet.
    #[inline]
    pub fn mark(&self) -> u32 {
        self.mark
    }

    /// Index of the interface the packet arrived on, or 0 for locally
    /// generated packets.
    #[inline]
    pub fn indev(&self) -> u32 {
        self.indev
    }

    /// Index of the interface the packet will leave through, or 0 when not
    /// yet routed.
    #[inline]
    pub fn outdev(&self) -> u32 {
        self.outdev
    }

    /// Index of the bridge port the packet arrived on, or 0.
    #[inline]
    pub fn physindev(&self) -> u32 {
        self.physindev
    }

    /// Index of the bridge port the packet will leave through, or 0.
    #[inline]
    pub fn physoutdev(&self) -> u32 {
        self.physoutdev
    }

    /// Link layer protocol (EtherType) of the packet.
    #[inline]
    pub fn hw_protocol(&self) -> u16 {
        self.hw_protocol
    }

    /// Netfilter hook the packet was queued from.
    #[inline]
    pub fn hook(&self) -> u8 {
        self.hook
    }

    /// Length of the packet before the copy range was applied.
    pub fn original_len(&self) -> usize {
        match self.cap_len {
            Some(len) => len as usize,
            None => self.payload.len(),
        }
    }

    /// The verdict issued so far, if any.
    #[inline]
    pub fn verdict(&self) -> Option<Verdict> {
        self.verdict
    }

    /// Returns true once a verdict has been issued.
    #[inline]
    pub fn has_verdict(&self) -> bool {
        self.verdict.is_some()
    }

    /// Issues a verdict without touching the packet or its mark.
    pub fn set_verdict(&mut self, verdict: Verdict) -> Result<()> {
        self.issue(verdict, None, None)
    }

    /// Accepts the packet.
    pub fn accept(&mut self) -> Result<()> {
        self.set_verdict(Verdict::Accept)
    }

    /// Drops the packet.
    pub fn discard(&mut self) -> Result<()> {
        self.set_verdict(Verdict::Drop)
    }

    /// Issues a verdict and replaces the packet contents with `data`.
    ///
    /// `data` must not be empty.
    pub fn set_verdict_modified(&mut self, verdict: Verdict, data: &[u8]) -> Result<()> {
        self.issue(verdict, None, Some(data))
    }

    /// Issues a verdict and sets the packet's firewall mark.
    pub fn set_verdict_mark(&mut self, verdict: Verdict, mark: u32) -> Result<()> {
        self.issue(verdict, Some(mark), None)
    }

    /// Issues a verdict, sets the firewall mark and replaces the contents.
    ///
    /// `data` must not be empty.
    pub fn set_verdict_mark_modified(
        &mut self,
        verdict: Verdict,
        mark: u32,
        data: &[u8],
    ) -> Result<()> {
        self.issue(verdict, Some(mark), Some(data))
    }

    fn issue(&mut self, verdict: Verdict, mark: Option<u32>, data: Option<&[u8]>) -> Result<()> {
        if let Some(previous) = self.verdict {
            return Err(NfqError::VerdictAlreadyIssued {
                packet_id: self.id,
                previous,
            });
        }

        if let Some(data) = data {
            if data.is_empty() {
                return Err(NfqError::EmptyReplacement { packet_id: self.id });
            }
            if data.len() > MAX_ATTR_PAYLOAD {
                return Err(NfqError::ReplacementTooLarge {
                    packet_id: self.id,
                    len: data.len(),
                    max: MAX_ATTR_PAYLOAD,
                });
            }
        }

        // The kernel offers no retry for a verdict, so the packet counts as
        // verdicted whether or not the send succeeds.
        self.verdict = Some(verdict);

        let request = VerdictRequest {
            queue_num: self.queue_num,
            packet_id: self.id,
            verdict,
            mark,
            payload: data,
        };
        match self.sink.send_verdict(&request) {
            Ok(()) => {
                self.stats
                    .record_verdict(verdict, mark.is_some(), data.is_some());
                Ok(())
            }
            Err(source) => {
                error!("Failed to send verdict {} for packet {}: {}", verdict, self.id, source);
                self.stats.record_verdict_failure();
                Err(NfqError::Verdict {
                    packet_id: self.id,
                    source,
                })
            }
        }
    }
}

impl fmt::Debug for Packet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("queue_num", &self.queue_num)
            .field("id", &self.id)
            .field("hw_protocol", &format_args!("{:#06x}", self.hw_protocol))
            .field("hook", &self.hook)
            .field("mark", &self.mark)
            .field("indev", &self.indev)
            .field("outdev", &self.outdev)
            .field("payload_len", &self.payload.len())
            .field("verdict", &self.verdict)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::testing::RecordingSink;

    fn event(payload: Option<&[u8]>) -> PacketEvent<'_> {
        PacketEvent {
            queue_num: 0,
            packet_id: 42,
            hw_protocol: 0x0800,
            hook: 1,
            mark: 7,
            indev: 2,
            outdev: 3,
            physindev: 4,
            physoutdev: 5,
            cap_len: None,
            payload,
        }
    }

    #[test]
    fn test_full_packet_payload_is_exact() {
        let sink = RecordingSink::default();
        let stats = QueueStats::new();
        let bytes = [0x45, 0x00, 0x00, 0x1c, 0xab];
        let packet = Packet::new(&sink, &stats, &event(Some(&bytes)), CopyMode::Packet);

        assert_eq!(packet.payload(), &bytes);
        assert_eq!(packet.original_len(), bytes.len());
        assert_eq!(packet.id(), 42);
    }

    #[test]
    fn test_metadata_mode_hides_payload() {
        let sink = RecordingSink::default();
        let stats = QueueStats::new();
        let bytes = [1, 2, 3];
        let packet = Packet::new(&sink, &stats, &event(Some(&bytes)), CopyMode::Metadata);

        assert!(packet.payload().is_empty());
        assert_eq!(packet.mark(), 7);
        assert_eq!(packet.indev(), 2);
        assert_eq!(packet.outdev(), 3);
        assert_eq!(packet.physindev(), 4);
        assert_eq!(packet.physoutdev(), 5);
        assert_eq!(packet.hw_protocol(), 0x0800);
    }

    #[test]
    fn test_missing_payload_reads_empty() {
        let sink = RecordingSink::default();
        let stats = QueueStats::new();
        let packet = Packet::new(&sink, &stats, &event(None), CopyMode::Packet);
        assert!(packet.payload().is_empty());
    }

    #[test]
    fn test_modified_verdict_reaches_sink_once() {
        let sink = RecordingSink::default();
        let stats = QueueStats::new();
        let mut packet = Packet::new(&sink, &stats, &event(None), CopyMode::Packet);

        packet
            .set_verdict_modified(Verdict::Accept, &[0xDE, 0xAD, 0xBE, 0xEF])
            .unwrap();

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].verdict, Verdict::Accept);
        assert_eq!(sent[0].packet_id, 42);
        assert_eq!(sent[0].payload.as_deref(), Some(&[0xDE, 0xAD, 0xBE, 0xEF][..]));
        assert_eq!(stats.snapshot().modified, 1);
    }

    #[test]
    fn test_empty_replacement_rejected_before_sink() {
        let sink = RecordingSink::default();
        let stats = QueueStats::new();
        let mut packet = Packet::new(&sink, &stats, &event(None), CopyMode::Packet);

        let result = packet.set_verdict_modified(Verdict::Accept, &[]);
        assert!(matches!(result, Err(NfqError::EmptyReplacement { packet_id: 42 })));
        assert!(sink.sent().is_empty());

        // the packet can still be verdicted correctly
        assert!(!packet.has_verdict());
        packet.accept().unwrap();
        assert_eq!(sink.sent().len(), 1);
    }

    #[test]
    fn test_oversized_replacement_rejected() {
        let sink = RecordingSink::default();
        let stats = QueueStats::new();
        let mut packet = Packet::new(&sink, &stats, &event(None), CopyMode::Packet);

        let data = vec![0u8; MAX_ATTR_PAYLOAD + 1];
        let result = packet.set_verdict_mark_modified(Verdict::Accept, 1, &data);
        assert!(matches!(result, Err(NfqError::ReplacementTooLarge { .. })));
        assert!(sink.sent().is_empty());
    }

    #[test]
    fn test_second_verdict_rejected() {
        let sink = RecordingSink::default();
        let stats = QueueStats::new();
        let mut packet = Packet::new(&sink, &stats, &event(None), CopyMode::Packet);

        packet.set_verdict_mark(Verdict::Accept, 0x20).unwrap();
        let second = packet.discard();

        assert!(matches!(
            second,
            Err(NfqError::VerdictAlreadyIssued {
                packet_id: 42,
                previous: Verdict::Accept
            })
        ));
        assert_eq!(sink.sent().len(), 1);
        assert_eq!(sink.sent()[0].mark, Some(0x20));
        assert_eq!(packet.verdict(), Some(Verdict::Accept));
    }

    #[test]
    fn test_failed_send_is_reported_not_retried() {
        let sink = RecordingSink::failing();
        let stats = QueueStats::new();
        let mut packet = Packet::new(&sink, &stats, &event(None), CopyMode::Packet);

        assert!(matches!(packet.accept(), Err(NfqError::Verdict { packet_id: 42, .. })));
        assert!(packet.has_verdict());
        assert!(matches!(
            packet.accept(),
            Err(NfqError::VerdictAlreadyIssued { .. })
        ));
        assert_eq!(sink.attempts(), 1);
        assert_eq!(stats.snapshot().verdict_failures, 1);
    }
}
