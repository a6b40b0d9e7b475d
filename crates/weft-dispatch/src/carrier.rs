//! # Carrier contract
//!
//! A carrier is a host-provided byte pipe with a hard per-call byte
//! budget: an event channel, a network-replicated property, or an ability
//! actuator whose trigger payload smuggles a few bytes. The host escapes
//! frames into whatever text alphabet its channel needs; the dispatcher
//! treats the pipe as opaque bytes and enforces only the budget.
//!
//! Inbound traffic does not come through this trait — the host pushes
//! received bytes into the dispatcher's `handle_frame` with the lane they
//! arrived on.

use bytes::Bytes;
use std::cell::RefCell;
use std::rc::Rc;

/// Opaque peer identity assigned by the host.
pub type PeerId = u64;

/// Which of a peer's endpoint slots a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Tiny client→server bursts over the ability actuator.
    Small,
    /// Bidirectional moderate traffic over the event channel.
    Mid,
    /// Large server→client payloads over a per-peer keyed slot.
    Big,
    /// Unreliable server→all fan-out over a broadcast property.
    Broadcast,
}

/// One host byte pipe.
pub trait Carrier {
    /// Hard cap on the bytes of a single `transmit` call.
    fn byte_budget(&self) -> usize;

    /// Push one encoded frame toward `peer`. Broadcast-style carriers
    /// ignore the peer argument.
    fn transmit(&mut self, peer: PeerId, frame: Bytes);
}

/// Carriers are shared between the dispatcher and the endpoint transmit
/// hooks; the whole layer is single-threaded cooperative.
pub type SharedCarrier = Rc<RefCell<dyn Carrier>>;

/// Convenience wrapper for handing a concrete carrier to the dispatcher.
pub fn shared<C: Carrier + 'static>(carrier: C) -> SharedCarrier {
    Rc::new(RefCell::new(carrier))
}
