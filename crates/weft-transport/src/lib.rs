//! # weft-transport
//!
//! Reliable ordered message transport over an unreliable carrier that only
//! exposes tiny opaque frames: a 32-bit header word plus a short byte
//! payload. A selective-repeat ARQ endpoint gives exactly-once, in-order
//! delivery even under heavy carrier loss; an unreliable sibling endpoint
//! shares the framing discipline for best-effort traffic.
//!
//! The crate is pure logic — no I/O, no clocks. Callers drive endpoints
//! with `tick(now)` at a configured interval and feed inbound frames via
//! `on_receive_frame(now, ..)`; outbound frames leave through a transmit
//! hook. Timestamps are plain milliseconds so tests control time.
//!
//! ## Crate structure
//!
//! - [`serial`] — circular sequence-number arithmetic
//! - [`wire`] — bit-packed header codec, frame and batch encoding
//! - [`queue`] — FIFO message queue
//! - [`window`] — fixed-capacity sliding-window slot buffers
//! - [`endpoint`] — the reliable (selective-repeat ARQ) endpoint
//! - [`unreliable`] — sequence-counted lossy sibling endpoint
//! - [`stats`] — per-endpoint counters and EWMA smoothing

pub mod endpoint;
pub mod queue;
pub mod serial;
pub mod stats;
pub mod unreliable;
pub mod window;
pub mod wire;
