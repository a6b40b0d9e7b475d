//! Deterministic network impairment for integration testing.
//!
//! The protocol core is pure logic, so the "network" in tests is a queue
//! of frames with loss, duplication, and reordering applied by a seeded
//! RNG — every run reproducible from its seed, no sockets, no sleeps.
//!
//! [`impairment`] holds the lossy link itself; [`harness`] wires two
//! reliable endpoints back-to-back over a pair of impaired links and
//! drives them with a deterministic tick loop.

pub mod harness;
pub mod impairment;

pub use harness::DuplexHarness;
pub use impairment::{ImpairedLink, ImpairmentConfig};
