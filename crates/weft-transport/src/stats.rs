//! # Endpoint statistics
//!
//! Per-endpoint counters, designed for JSON export, plus the EWMA smoother
//! the reliable endpoint uses for RTT estimation. Protocol-internal
//! anomalies (duplicates, out-of-window sequences, malformed frames) are
//! counted here and never surfaced as errors — a hostile peer must not be
//! able to kill an endpoint.

use serde::Serialize;

// ─── Reliable endpoint counters ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReliableStats {
    /// Frames handed to the transmit hook (data, ack-only, keepalive).
    pub frames_sent: u64,
    /// Frames fed into `on_receive_frame` that parsed cleanly.
    pub frames_received: u64,
    /// Fresh packets entered into the send window.
    pub packets_sent: u64,
    /// Retransmissions of packets already in the send window.
    pub packets_resent: u64,
    /// Packets confirmed by cumulative or selective ack.
    pub packets_acked: u64,
    /// In-order packets handed to the receive queue.
    pub packets_delivered: u64,
    /// Messages pushed into the receive queue.
    pub messages_delivered: u64,
    /// Ack-only frames emitted because the ack timer expired.
    pub keepalives_sent: u64,
    /// Frames whose seq was already buffered or already delivered.
    pub duplicates: u64,
    /// Frames whose seq fell outside any acceptable window.
    pub out_of_window: u64,
    /// Frames or batches that failed to parse.
    pub decode_errors: u64,
    /// Emissions aborted because the chosen payload broke the byte cap.
    pub framing_overflows: u64,
}

impl ReliableStats {
    /// Retransmissions per packet entered into the window.
    pub fn resend_ratio(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.packets_resent as f64 / self.packets_sent as f64
        }
    }
}

// ─── Unreliable endpoint counters ───────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct UnreliableStats {
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub messages_delivered: u64,
    /// Forward sequence gaps observed on receive. No recovery is attempted.
    pub lost: u64,
    /// Datagrams that arrived behind the receive expectation.
    pub stale_dropped: u64,
    pub decode_errors: u64,
}

impl UnreliableStats {
    /// Observed loss rate: gaps over everything the sender put on the wire
    /// that we know about.
    pub fn loss_rate(&self) -> f64 {
        let seen = self.datagrams_received + self.lost;
        if seen == 0 {
            0.0
        } else {
            self.lost as f64 / seen as f64
        }
    }
}

// ─── EWMA ───────────────────────────────────────────────────────────────────

/// Exponentially weighted moving average.
#[derive(Debug, Clone)]
pub struct Ewma {
    /// Smoothing factor (0.0 - 1.0). Higher = more responsive.
    alpha: f64,
    value: f64,
    initialized: bool,
}

impl Ewma {
    pub fn new(alpha: f64) -> Self {
        assert!((0.0..=1.0).contains(&alpha), "alpha must be in [0, 1]");
        Ewma {
            alpha,
            value: 0.0,
            initialized: false,
        }
    }

    /// Update with a new sample and return the smoothed value. The first
    /// sample seeds the average directly.
    pub fn update(&mut self, sample: f64) -> f64 {
        if !self.initialized {
            self.value = sample;
            self.initialized = true;
        } else {
            self.value += self.alpha * (sample - self.value);
        }
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}
