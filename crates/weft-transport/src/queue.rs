//! FIFO queue of opaque serialized messages.
//!
//! Producers enqueue at the tail, the endpoint batches from the head; the
//! protocol never reorders what the producer enqueued. The receive hook is
//! handed a `&mut MessageQueue` and is expected to drain it.

use bytes::Bytes;
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct MessageQueue {
    items: VecDeque<Bytes>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message; returns the new depth.
    pub fn push(&mut self, message: Bytes) -> usize {
        self.items.push_back(message);
        self.items.len()
    }

    /// Remove and return the oldest message.
    pub fn pop(&mut self) -> Option<Bytes> {
        self.items.pop_front()
    }

    /// Look at the oldest message without removing it.
    pub fn peek(&self) -> Option<&Bytes> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drain every queued message in FIFO order.
    pub fn drain(&mut self) -> impl Iterator<Item = Bytes> + '_ {
        self.items.drain(..)
    }
}
