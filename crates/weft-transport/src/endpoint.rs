//! # Reliable endpoint
//!
//! The selective-repeat ARQ state machine. Pure logic — no I/O, no clock.
//! A driver calls [`ReliableEndpoint::tick`] at the configured update
//! interval and feeds inbound frames to
//! [`ReliableEndpoint::on_receive_frame`]; at most one outbound frame per
//! tick leaves through the transmit hook.
//!
//! ## Responsibilities
//!
//! 1. **Batching**: drain queued messages into packets under the byte cap
//! 2. **Send window**: park packets until acked, retransmit on deadline
//! 3. **Ack decisions**: cumulative ack + SACK bitmap + NAK acceleration
//! 4. **Receive window**: buffer out-of-order packets, deliver in-order runs
//! 5. **RTT estimation**: EWMA over cumulative-ack samples
//! 6. **Piggyback**: carry a paired endpoint's ack in the secondary header
//!
//! Hooks are boxed `FnMut` capability objects, set once during wiring; the
//! unset state is `None`. Hooks must not re-enter the endpoint they were
//! set on.
//!
//! Delivery order to the receive hook equals enqueue order on the sender
//! for every message that is delivered at all; deduplication keys on the
//! packet sequence number, so a packet may cross the wire arbitrarily many
//! times without double-delivery.

use bytes::Bytes;
use thiserror::Error;

use crate::queue::MessageQueue;
use crate::serial::SeqSpace;
use crate::stats::{Ewma, ReliableStats};
use crate::window::{RecvSlot, SendSlot, SlotBuffer};
use crate::wire::{self, FrameHeader};

// ─── Hooks ──────────────────────────────────────────────────────────────────

/// Outbound frame hook: `(header_word, payload)`.
pub type TransmitFn = Box<dyn FnMut(u32, Option<Bytes>)>;
/// Inbound delivery hook; drains the queue it is handed.
pub type ReceiveFn = Box<dyn FnMut(&mut MessageQueue)>;
/// Invoked once per freshly acknowledged sequence number.
pub type AckFn = Box<dyn FnMut(u8)>;
/// Pulls a paired endpoint's would-be ack header for piggybacking.
pub type SecondHeaderGetFn = Box<dyn FnMut() -> Option<u32>>;
/// Receives `(now_ms, secondary_word)` split out of an inbound frame.
pub type SecondHeaderFn = Box<dyn FnMut(u64, u32)>;

// ─── Configuration ──────────────────────────────────────────────────────────

/// Reliable endpoint tuning. All durations are in milliseconds.
#[derive(Debug, Clone)]
pub struct ReliableConfig {
    /// Sequence width in bits, at most 4. Window is `2^(seq_bits - 1)`.
    pub seq_bits: u8,
    /// `send` rejects messages larger than this.
    pub max_message_size: usize,
    /// Cap on the serialized payload bytes of one frame.
    pub max_packet_size: usize,
    /// Nominal interval between `tick` calls.
    pub update_interval: u64,
    /// An ack-only frame goes out after `factor × update_interval` of
    /// outbound silence.
    pub ack_timeout_factor: u32,
    /// An unacked packet is retransmitted `factor × update_interval`
    /// after its last transmission.
    pub packet_resend_delay_factor: u32,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        ReliableConfig {
            seq_bits: 4,
            max_message_size: 120,
            max_packet_size: 160,
            update_interval: 100,
            ack_timeout_factor: 4,
            packet_resend_delay_factor: 8,
        }
    }
}

// ─── Errors ─────────────────────────────────────────────────────────────────

/// Submission failures reported to the caller. Protocol-internal trouble
/// (malformed frames, duplicates, window violations) is counted in
/// [`ReliableStats`] instead — inbound bytes can never kill an endpoint.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("message of {size} bytes exceeds the {limit}-byte endpoint limit")]
    TooLarge { size: usize, limit: usize },
}

// ─── Endpoint ───────────────────────────────────────────────────────────────

/// Squared RTT deviation below which a sample is ignored; keeps millisecond
/// jitter from wobbling the estimate.
const RTT_DEADBAND_SQ: f64 = 1.0;

pub struct ReliableEndpoint {
    config: ReliableConfig,
    space: SeqSpace,

    // Send side.
    ack_expected: u8,
    next_to_send: u8,
    out_buffered: u8,
    out_buffer: SlotBuffer<SendSlot>,
    send_queue: MessageQueue,

    // Receive side.
    packet_expected: u8,
    in_buffer: SlotBuffer<RecvSlot>,
    receive_queue: MessageQueue,
    /// Receive-side state changed since our last ack went out (on our own
    /// frames or piggybacked on a paired endpoint's).
    ack_pending: bool,

    // Timing.
    last_ack_sent_at: u64,
    resend_delay: u64,
    ack_timeout: u64,
    rtt: Ewma,

    transmission_locked: bool,
    stats: ReliableStats,

    on_transmit: Option<TransmitFn>,
    on_receive: Option<ReceiveFn>,
    on_ack: Option<AckFn>,
    second_getter: Option<SecondHeaderGetFn>,
    on_second: Option<SecondHeaderFn>,
}

impl ReliableEndpoint {
    /// Create an endpoint in the locked (pre-handshake) state. Messages
    /// queue up but no frame leaves until [`unlock_transmission`] runs.
    ///
    /// [`unlock_transmission`]: ReliableEndpoint::unlock_transmission
    pub fn new(config: ReliableConfig) -> Self {
        let space = SeqSpace::new(config.seq_bits);
        assert!(
            config.max_message_size + wire::BATCH_OVERHEAD + wire::MESSAGE_OVERHEAD
                <= config.max_packet_size,
            "max_packet_size {} cannot frame a max_message_size {} message",
            config.max_packet_size,
            config.max_message_size,
        );
        let window = space.window();
        ReliableEndpoint {
            space,
            ack_expected: 0,
            next_to_send: 0,
            out_buffered: 0,
            out_buffer: SlotBuffer::new(window),
            send_queue: MessageQueue::new(),
            packet_expected: 0,
            in_buffer: SlotBuffer::new(window),
            receive_queue: MessageQueue::new(),
            ack_pending: false,
            last_ack_sent_at: 0,
            resend_delay: config.update_interval * config.packet_resend_delay_factor as u64,
            ack_timeout: config.update_interval * config.ack_timeout_factor as u64,
            rtt: Ewma::new(2.0 / (window as f64 + 1.0)),
            transmission_locked: true,
            stats: ReliableStats::default(),
            on_transmit: None,
            on_receive: None,
            on_ack: None,
            second_getter: None,
            on_second: None,
            config,
        }
    }

    // ─── Wiring ─────────────────────────────────────────────────────────

    pub fn set_transmit_callback(&mut self, f: TransmitFn) {
        self.on_transmit = Some(f);
    }

    pub fn set_receive_callback(&mut self, f: ReceiveFn) {
        self.on_receive = Some(f);
    }

    pub fn set_ack_callback(&mut self, f: AckFn) {
        self.on_ack = Some(f);
    }

    pub fn set_second_header_getter(&mut self, f: SecondHeaderGetFn) {
        self.second_getter = Some(f);
    }

    pub fn set_second_header_callback(&mut self, f: SecondHeaderFn) {
        self.on_second = Some(f);
    }

    /// Clear the initial lock. Until this runs, `tick` emits nothing and
    /// submissions accumulate in the queue; they flush on the next tick.
    pub fn unlock_transmission(&mut self) {
        self.transmission_locked = false;
    }

    // ─── Submission ─────────────────────────────────────────────────────

    /// Enqueue one serialized message. Never blocks; returns the queue
    /// depth after the push.
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

    // ─── Tick: frame construction ───────────────────────────────────────

    /// Drive retransmission timers, ack throttling, and frame emission.
    /// Invokes the transmit hook at most once. Idempotent when called more
    /// often than the update interval.
    pub fn tick(&mut self, now: u64) {
        if self.transmission_locked {
            return;
        }

        // Earliest overdue retransmission wins; ties go to the lowest seq
        // because the scan walks the window oldest-first. A deadline of 0
        // is the NAK-accelerated sentinel and sorts ahead of everything.
        let mut overdue: Option<(u64, u8)> = None;
        for i in 0..self.out_buffered {
            let seq = self.space.add(self.ack_expected, i as i16);
            if let Some(slot) = self.out_buffer.get(seq) {
                if slot.resend_at <= now && overdue.map_or(true, |(d, _)| slot.resend_at < d) {
                    overdue = Some((slot.resend_at, seq));
                }
            }
        }

        let mut carried: Option<(u8, Bytes)> = None;
        if let Some((_, seq)) = overdue {
            if let Some(slot) = self.out_buffer.get_mut(seq) {
                slot.resend_at = now + self.resend_delay;
                self.stats.packets_resent += 1;
                carried = Some((seq, slot.packet.clone()));
            }
        } else if self.out_buffered < self.space.window() && !self.send_queue.is_empty() {
            let payload = self.build_packet();
            let seq = self.next_to_send;
            self.out_buffer.insert(
                seq,
                SendSlot {
                    packet: payload.clone(),
                    sent_at: now,
                    resend_at: now + self.resend_delay,
                },
            );
            self.next_to_send = self.space.add(seq, 1);
            self.out_buffered += 1;
            self.stats.packets_sent += 1;
            carried = Some((seq, payload));
        }

        let second = self.second_getter.as_mut().and_then(|g| g());
        let ack_due = now.saturating_sub(self.last_ack_sent_at) >= self.ack_timeout;
        if carried.is_none() && second.is_none() && !ack_due {
            return;
        }

        let mut header = FrameHeader {
            ack: self.space.add(self.packet_expected, -1),
            sack: self.sack_bitmap(),
            seq: carried.as_ref().map(|(seq, _)| *seq),
        }
        .encode();
        if let Some(s) = second {
            header = wire::merge(header, s);
        }

        let payload = carried.map(|(_, p)| p);
        if let Some(p) = &payload {
            if p.len() > self.config.max_packet_size {
                // Misconfiguration; abort this emission and leave a trace.
                self.stats.framing_overflows += 1;
                return;
            }
        } else if second.is_none() {
            self.stats.keepalives_sent += 1;
        }

        if let Some(cb) = self.on_transmit.as_mut() {
            cb(header, payload);
        }
        self.stats.frames_sent += 1;
        self.last_ack_sent_at = now;
        self.ack_pending = false;
        self.debug_check_invariants();
    }

    /// Drain queued messages into one packet: stop at the byte cap or the
    /// 15-message batch limit, whichever comes first.
    fn build_packet(&mut self) -> Bytes {
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
        wire::encode_batch(&batch)
    }

    /// Bit `i` covers seq `packet_expected + i`, i.e. `ack + 1 + i`.
    fn sack_bitmap(&self) -> u8 {
        let mut sack = 0u8;
        for i in 0..self.space.window().min(8) {
            let seq = self.space.add(self.packet_expected, i as i16);
            if self.in_buffer.occupied(seq) {
                sack |= 1 << i;
            }
        }
        sack
    }

    // ─── Frame reception ────────────────────────────────────────────────

    /// Process one inbound frame. May invoke the ack hook once per freshly
    /// acked seq, the secondary-header hook, and the receive hook if
    /// in-order runs were assembled. Survives arbitrary input.
    pub fn on_receive_frame(&mut self, now: u64, header: u32, payload: Option<Bytes>) {
        let (primary, secondary) = wire::split(header);
        if let Some(word) = secondary {
            if let Some(cb) = self.on_second.as_mut() {
                cb(now, word);
            }
        }

        let h = FrameHeader::decode(primary);
        if h.ack >= self.space.modulus() {
            self.stats.decode_errors += 1;
            return;
        }
        self.stats.frames_received += 1;

        self.process_acks(now, &h);

        match (h.seq, payload) {
            (Some(seq), Some(raw)) => self.accept_packet(seq, &raw),
            (Some(_), None) => {
                // DATA set but the payload went missing.
                self.stats.decode_errors += 1;
            }
            _ => {}
        }

        if !self.receive_queue.is_empty() {
            if let Some(cb) = self.on_receive.as_mut() {
                cb(&mut self.receive_queue);
            }
        }
        self.debug_check_invariants();
    }

    /// Cumulative ack, SACK frees, and NAK acceleration.
    fn process_acks(&mut self, now: u64, h: &FrameHeader) {
        // Everything up to and including h.ack is confirmed.
        while self.space.between(self.ack_expected, h.ack, self.next_to_send) {
            let seq = self.ack_expected;
            if let Some(slot) = self.out_buffer.take(seq) {
                self.sample_rtt(now, slot.sent_at);
                self.stats.packets_acked += 1;
                if let Some(cb) = self.on_ack.as_mut() {
                    cb(seq);
                }
            }
            self.ack_expected = self.space.add(seq, 1);
            self.out_buffered -= 1;
        }

        for i in 0..8u8 {
            let seq = self.space.add(h.ack, 1 + i as i16);
            if !self.space.between(self.ack_expected, seq, self.next_to_send) {
                continue;
            }
            if h.sack & (1 << i) != 0 {
                // Arrived out of order on the far side; no resend needed.
                if self.out_buffer.take(seq).is_some() {
                    self.stats.packets_acked += 1;
                    if let Some(cb) = self.on_ack.as_mut() {
                        cb(seq);
                    }
                }
            } else if seq == self.ack_expected && (h.sack as u16) >> (i + 1) != 0 {
                // A later seq got through while the oldest unacked did
                // not: schedule it ahead of every timer.
                if let Some(slot) = self.out_buffer.get_mut(seq) {
                    slot.resend_at = 0;
                }
            }
        }
    }

    /// Window acceptance, duplicate counting, and in-order draining.
    fn accept_packet(&mut self, seq: u8, raw: &Bytes) {
        if seq >= self.space.modulus() {
            self.stats.out_of_window += 1;
            return;
        }
        let window = self.space.window() as i16;
        let in_too_far = self.space.add(self.packet_expected, window);
        if self.space.between(self.packet_expected, seq, in_too_far) {
            if self.in_buffer.occupied(seq) {
                self.stats.duplicates += 1;
                self.ack_pending = true;
            } else {
                match wire::decode_batch(raw) {
                    Some(messages) => {
                        self.in_buffer.insert(seq, messages);
                        self.ack_pending = true;
                    }
                    None => self.stats.decode_errors += 1,
                }
            }
        } else {
            // The window spans half the space, so anything else in the
            // space is behind it: a packet we already delivered, resent
            // because the peer missed our ack.
            self.stats.duplicates += 1;
            self.ack_pending = true;
        }

        while let Some(messages) = self.in_buffer.take(self.packet_expected) {
            self.stats.packets_delivered += 1;
            self.stats.messages_delivered += messages.len() as u64;
            for m in messages {
                self.receive_queue.push(m);
            }
            self.packet_expected = self.space.add(self.packet_expected, 1);
        }
    }

    fn sample_rtt(&mut self, now: u64, sent_at: u64) {
        let sample = now.saturating_sub(sent_at) as f64;
        let delta = sample - self.rtt.value();
        if !self.rtt.is_initialized() || delta * delta > RTT_DEADBAND_SQ {
            self.rtt.update(sample);
        }
    }

    // ─── Piggyback ──────────────────────────────────────────────────────

    /// The would-be ack-only header word, surrendered once per
    /// receive-side change. A paired endpoint's frame carries it when this
    /// endpoint has no carrier of its own.
    pub fn take_pending_ack_header(&mut self) -> Option<u32> {
        if !self.ack_pending {
            return None;
        }
        self.ack_pending = false;
        Some(
            FrameHeader {
                ack: self.space.add(self.packet_expected, -1),
                sack: self.sack_bitmap(),
                seq: None,
            }
            .encode(),
        )
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn ack_expected(&self) -> u8 {
        self.ack_expected
    }

    pub fn next_to_send(&self) -> u8 {
        self.next_to_send
    }

    pub fn packet_expected(&self) -> u8 {
        self.packet_expected
    }

    pub fn in_too_far(&self) -> u8 {
        self.space.add(self.packet_expected, self.space.window() as i16)
    }

    /// Packets in flight: `next_to_send - ack_expected`, circularly.
    pub fn out_buffered(&self) -> u8 {
        self.out_buffered
    }

    /// Depth of the outbound message queue.
    pub fn send_depth(&self) -> usize {
        self.send_queue.len()
    }

    pub fn is_locked(&self) -> bool {
        self.transmission_locked
    }

    /// Smoothed RTT estimate in milliseconds; 0 before the first sample.
    pub fn rtt_ms(&self) -> f64 {
        self.rtt.value()
    }

    pub fn stats(&self) -> &ReliableStats {
        &self.stats
    }

    pub fn config(&self) -> &ReliableConfig {
        &self.config
    }

    #[inline]
    fn debug_check_invariants(&self) {
        #[cfg(debug_assertions)]
        {
            let w = self.space.window();
            debug_assert!(self.out_buffered <= w);
            debug_assert!(self.space.between(
                self.ack_expected,
                self.next_to_send,
                self.space.add(self.ack_expected, w as i16 + 1),
            ));
            // Send slots beyond the in-flight span must be free.
            for i in self.out_buffered..w {
                let seq = self.space.add(self.ack_expected, i as i16);
                debug_assert!(
                    !self.out_buffer.occupied(seq),
                    "send slot {seq} occupied outside the in-flight span"
                );
            }
            // The head of the receive window is always drained.
            debug_assert!(!self.in_buffer.occupied(self.packet_expected));
        }
    }
}
