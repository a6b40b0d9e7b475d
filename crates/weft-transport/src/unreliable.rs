//! # Unreliable endpoint
//!
//! The lossy sibling of the reliable endpoint: same submission surface,
//! same batching discipline, no retransmission and no ordering repair.
//! Every datagram carries a bare sequence counter and the sender's clock
//! (low 16 bits of milliseconds); the receive side counts forward gaps as
//! loss and drops anything that arrives behind its expectation.

use bytes::Bytes;

use crate::endpoint::{ReceiveFn, SendError, TransmitFn};
use crate::queue::MessageQueue;
use crate::stats::UnreliableStats;
use crate::wire::{self, DatagramHeader};

// ─── Configuration ──────────────────────────────────────────────────────────

/// Unreliable endpoint tuning. Durations in milliseconds.
#[derive(Debug, Clone)]
pub struct UnreliableConfig {
    /// `send` rejects messages larger than this.
    pub max_message_size: usize,
    /// Cap on the serialized payload bytes of one datagram.
    pub max_packet_size: usize,
    /// Nominal interval between `tick` calls.
    pub update_interval: u64,
    /// Sequence-counter modulus; the header field is one byte.
    pub max_seq: u16,
}

impl Default for UnreliableConfig {
    fn default() -> Self {
        UnreliableConfig {
            max_message_size: 120,
            max_packet_size: 160,
            update_interval: 100,
            max_seq: 256,
        }
    }
}

// ─── Endpoint ───────────────────────────────────────────────────────────────

pub struct UnreliableEndpoint {
    config: UnreliableConfig,
    next_seq: u8,
    /// Next seq we expect to observe; `None` until the first datagram.
    expected_seq: Option<u8>,
    send_queue: MessageQueue,
    receive_queue: MessageQueue,
    transmission_locked: bool,
    stats: UnreliableStats,
    on_transmit: Option<TransmitFn>,
    on_receive: Option<ReceiveFn>,
}

impl UnreliableEndpoint {
    pub fn new(config: UnreliableConfig) -> Self {
        assert!(
            config.max_message_size + wire::BATCH_OVERHEAD + wire::MESSAGE_OVERHEAD
                <= config.max_packet_size,
            "max_packet_size {} cannot frame a max_message_size {} message",
            config.max_packet_size,
            config.max_message_size,
        );
        assert!(
            config.max_seq >= 2 && config.max_seq <= 256,
            "max_seq must be in 2..=256, got {}",
            config.max_seq
        );
        UnreliableEndpoint {
            next_seq: 0,
            expected_seq: None,
            send_queue: MessageQueue::new(),
            receive_queue: MessageQueue::new(),
            transmission_locked: true,
            stats: UnreliableStats::default(),
            on_transmit: None,
            on_receive: None,
            config,
        }
    }

    pub fn set_transmit_callback(&mut self, f: TransmitFn) {
        self.on_transmit = Some(f);
    }

    pub fn set_receive_callback(&mut self, f: ReceiveFn) {
        self.on_receive = Some(f);
    }

    pub fn unlock_transmission(&mut self) {
        self.transmission_locked = false;
    }

    /// Enqueue one serialized message; returns the queue depth.
    pub fn send(&mut self, message: Bytes) -> Result<usize, SendError> {
        let size = message.len();
        if size > self.config.max_message_size {
            return Err(SendError::TooLarge {
                size,
                limit: self.config.max_message_size,
            });
        }
        Ok(self.send_queue.push(message))
    }

    /// Emit at most one datagram carrying whatever is queued and fits.
    /// Silence when the queue is empty: no acks, no keepalives.
    pub fn tick(&mut self, now: u64) {
        if self.transmission_locked || self.send_queue.is_empty() {
            return;
        }

        let mut batch: Vec<Bytes> = Vec::new();
        let mut size = wire::BATCH_OVERHEAD;
        while batch.len() < wire::MAX_BATCH_MESSAGES {
            let Some(next) = self.send_queue.peek() else {
                break;
            };
            let grown = size + wire::measured_size(next);
            if grown > self.config.max_packet_size {
                break;
            }
            size = grown;
            if let Some(m) = self.send_queue.pop() {
                batch.push(m);
            }
        }

        let header = DatagramHeader {
            seq: self.next_seq,
            timestamp_ms: (now & 0xFFFF) as u16,
        }
        .encode();
        self.next_seq = self.advance(self.next_seq, 1);
        self.stats.datagrams_sent += 1;
        let payload = wire::encode_batch(&batch);
        if let Some(cb) = self.on_transmit.as_mut() {
            cb(header, Some(payload));
        }
    }

    /// Process one inbound datagram: count the loss gap, deliver the batch.
    pub fn on_receive_frame(&mut self, _now: u64, header: u32, payload: Option<Bytes>) {
        let h = DatagramHeader::decode(header);
        if h.seq as u16 >= self.config.max_seq {
            self.stats.decode_errors += 1;
            return;
        }
        let Some(raw) = payload else {
            self.stats.decode_errors += 1;
            return;
        };

        if let Some(expected) = self.expected_seq {
            let gap = self.forward_gap(expected, h.seq);
            match gap {
                Some(lost) => self.stats.lost += lost as u64,
                None => {
                    // Behind the expectation: stale or duplicated on the
                    // wire. Delivering it would reorder the stream.
                    self.stats.stale_dropped += 1;
                    return;
                }
            }
        }
        self.expected_seq = Some(self.advance(h.seq, 1));

        match wire::decode_batch(&raw) {
            Some(messages) => {
                self.stats.datagrams_received += 1;
                self.stats.messages_delivered += messages.len() as u64;
                for m in messages {
                    self.receive_queue.push(m);
                }
            }
            None => {
                self.stats.decode_errors += 1;
                return;
            }
        }

        if !self.receive_queue.is_empty() {
            if let Some(cb) = self.on_receive.as_mut() {
                cb(&mut self.receive_queue);
            }
        }
    }

    /// Forward distance from `expected` to `observed`, or `None` when the
    /// shorter arc runs backwards (a stale datagram).
    fn forward_gap(&self, expected: u8, observed: u8) -> Option<u16> {
        let m = self.config.max_seq;
        let gap = (observed as u16 + m - expected as u16) % m;
        if gap < m / 2 {
            Some(gap)
        } else {
            None
        }
    }

    fn advance(&self, seq: u8, d: u16) -> u8 {
        ((seq as u16 + d) % self.config.max_seq) as u8
    }

    pub fn send_depth(&self) -> usize {
        self.send_queue.len()
    }

    pub fn is_locked(&self) -> bool {
        self.transmission_locked
    }

    pub fn stats(&self) -> &UnreliableStats {
        &self.stats
    }

    pub fn config(&self) -> &UnreliableConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn unlocked() -> UnreliableEndpoint {
        let mut ep = UnreliableEndpoint::new(UnreliableConfig::default());
        ep.unlock_transmission();
        ep
    }

    fn capture_transmit(ep: &mut UnreliableEndpoint) -> Rc<RefCell<Vec<(u32, Option<Bytes>)>>> {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let sink = sent.clone();
        ep.set_transmit_callback(Box::new(move |h, p| sink.borrow_mut().push((h, p))));
        sent
    }

    fn datagram(seq: u8, messages: &[Bytes]) -> (u32, Option<Bytes>) {
        let header = DatagramHeader {
            seq,
            timestamp_ms: 0,
        }
        .encode();
        (header, Some(wire::encode_batch(messages)))
    }

    #[test]
    fn tick_stamps_seq_and_time() {
        let mut ep = unlocked();
        let sent = capture_transmit(&mut ep);
        ep.send(Bytes::from_static(b"a")).unwrap();
        ep.tick(70_123);
        ep.send(Bytes::from_static(b"b")).unwrap();
        ep.tick(70_223);

        let frames = sent.borrow();
        let h0 = DatagramHeader::decode(frames[0].0);
        let h1 = DatagramHeader::decode(frames[1].0);
        assert_eq!(h0.seq, 0);
        assert_eq!(h1.seq, 1);
        assert_eq!(h0.timestamp_ms, (70_123u64 & 0xFFFF) as u16);
    }

    #[test]
    fn empty_queue_means_silence() {
        let mut ep = unlocked();
        let sent = capture_transmit(&mut ep);
        for t in 0..50 {
            ep.tick(t * 100);
        }
        assert!(sent.borrow().is_empty());
    }

    #[test]
    fn gap_counts_as_loss() {
        let mut ep = unlocked();
        let (h, p) = datagram(0, &[Bytes::from_static(b"x")]);
        ep.on_receive_frame(0, h, p);
        // 1 and 2 vanish.
        let (h, p) = datagram(3, &[Bytes::from_static(b"y")]);
        ep.on_receive_frame(1, h, p);
        assert_eq!(ep.stats().lost, 2);
        assert_eq!(ep.stats().datagrams_received, 2);
    }

    #[test]
    fn stale_datagram_dropped_not_delivered() {
        let mut ep = unlocked();
        let delivered = Rc::new(RefCell::new(0usize));
        let sink = delivered.clone();
        ep.set_receive_callback(Box::new(move |q| {
            *sink.borrow_mut() += q.drain().count();
        }));

        let (h3, p3) = datagram(3, &[Bytes::from_static(b"x")]);
        ep.on_receive_frame(0, h3, p3);
        let (h1, p1) = datagram(1, &[Bytes::from_static(b"y")]);
        ep.on_receive_frame(1, h1, p1);

        assert_eq!(*delivered.borrow(), 1);
        assert_eq!(ep.stats().stale_dropped, 1);
    }

    #[test]
    fn seq_wraps_through_modulus() {
        let mut ep = unlocked();
        let (h, p) = datagram(255, &[Bytes::from_static(b"x")]);
        ep.on_receive_frame(0, h, p);
        let (h, p) = datagram(0, &[Bytes::from_static(b"y")]);
        ep.on_receive_frame(1, h, p);
        assert_eq!(ep.stats().lost, 0);
        assert_eq!(ep.stats().datagrams_received, 2);
    }

    #[test]
    fn oversize_send_rejected() {
        let mut ep = unlocked();
        let limit = ep.config().max_message_size;
        assert!(ep.send(Bytes::from(vec![0u8; limit + 1])).is_err());
        assert_eq!(ep.send_depth(), 0);
    }

    #[test]
    fn locked_endpoint_is_silent() {
        let mut ep = UnreliableEndpoint::new(UnreliableConfig::default());
        let sent = capture_transmit(&mut ep);
        ep.send(Bytes::from_static(b"q")).unwrap();
        ep.tick(0);
        assert!(sent.borrow().is_empty());
        ep.unlock_transmission();
        ep.tick(100);
        assert_eq!(sent.borrow().len(), 1);
    }
}
