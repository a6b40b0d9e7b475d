//! # Sliding-window slot buffers
//!
//! Fixed-capacity circular buffers indexed by `seq mod capacity`. Capacity
//! is the window size, a power of two no larger than half the sequence
//! space, so every in-window sequence maps to a distinct slot. Slots are
//! `Option<T>` and get reused; the steady-state hot path allocates nothing
//! beyond the packets themselves.

use bytes::Bytes;

/// Fixed power-of-two array of optional slots, indexed by sequence number.
#[derive(Debug)]
pub struct SlotBuffer<T> {
    slots: Vec<Option<T>>,
    mask: u8,
}

impl<T> SlotBuffer<T> {
    /// Create a buffer of `capacity` slots. `capacity` must be a power of
    /// two (it is the window size, `2^(seq_bits-1)`).
    pub fn new(capacity: u8) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "window capacity must be a power of two, got {capacity}"
        );
        let mut slots = Vec::with_capacity(capacity as usize);
        slots.resize_with(capacity as usize, || None);
        SlotBuffer {
            slots,
            mask: capacity - 1,
        }
    }

    #[inline]
    fn index(&self, seq: u8) -> usize {
        (seq & self.mask) as usize
    }

    pub fn capacity(&self) -> u8 {
        self.mask + 1
    }

    /// Store a value in `seq`'s slot, returning whatever was there.
    pub fn insert(&mut self, seq: u8, value: T) -> Option<T> {
        let idx = self.index(seq);
        self.slots[idx].replace(value)
    }

    /// Empty `seq`'s slot, returning its value.
    pub fn take(&mut self, seq: u8) -> Option<T> {
        let idx = self.index(seq);
        self.slots[idx].take()
    }

    pub fn get(&self, seq: u8) -> Option<&T> {
        self.slots[self.index(seq)].as_ref()
    }

    pub fn get_mut(&mut self, seq: u8) -> Option<&mut T> {
        let idx = self.index(seq);
        self.slots[idx].as_mut()
    }

    pub fn occupied(&self, seq: u8) -> bool {
        self.slots[self.index(seq)].is_some()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }
}

/// A packet parked in the send window until acknowledged.
#[derive(Debug, Clone)]
pub struct SendSlot {
    /// Encoded batch payload, kept verbatim for retransmission.
    pub packet: Bytes,
    /// When the packet was first transmitted (RTT sampling).
    pub sent_at: u64,
    /// Next retransmission deadline. The literal value 0 marks a
    /// NAK-accelerated slot that resends ahead of every timer.
    pub resend_at: u64,
}

/// A packet parked in the receive window: its already-decoded messages.
pub type RecvSlot = Vec<Bytes>;
