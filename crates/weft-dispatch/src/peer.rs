//! # Per-peer endpoint set
//!
//! One [`PeerLink`] per attached peer: three reliable endpoints (Small,
//! Mid, Big) and the wiring between them. Lanes the local side cannot
//! transmit on get no transmit hook; their acks ride in the Mid lane's
//! secondary header instead, which is the only way a reliable endpoint
//! with no return carrier can advance its send window.
//!
//! The piggyback pairing is fixed by role:
//!
//! - a server receives on Small, so its Mid getter pulls Small's pending
//!   ack header, and inbound secondary words go to its Big sender;
//! - a client receives on Big, so its Mid getter pulls Big's pending ack
//!   header, and inbound secondary words go to its Small sender.

use bytes::Bytes;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::warn;

use weft_transport::endpoint::{ReliableConfig, ReliableEndpoint};
use weft_transport::unreliable::UnreliableConfig;
use weft_transport::wire;

use crate::carrier::{PeerId, SharedCarrier};
use crate::dispatcher::SharedStats;
use crate::event;
use crate::signal::SignalHub;

pub type SharedEndpoint = Rc<RefCell<ReliableEndpoint>>;

/// Which end of a connection this endpoint set serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

// ─── Lane profiles ──────────────────────────────────────────────────────────

/// Endpoint configuration per lane. The packet caps are sized so an
/// encoded frame (4-byte header word + payload) fits the matching
/// carrier's byte budget.
#[derive(Debug, Clone)]
pub struct LaneProfiles {
    pub small: ReliableConfig,
    pub mid: ReliableConfig,
    pub big: ReliableConfig,
    pub broadcast: UnreliableConfig,
}

impl Default for LaneProfiles {
    fn default() -> Self {
        LaneProfiles {
            // Ability slot: ~25 bytes per trigger.
            small: ReliableConfig {
                max_message_size: 18,
                max_packet_size: 21,
                ..Default::default()
            },
            // Event channel.
            mid: ReliableConfig {
                max_message_size: 160,
                max_packet_size: 200,
                ..Default::default()
            },
            // Per-peer keyed data slot.
            big: ReliableConfig {
                max_message_size: 800,
                max_packet_size: 850,
                ..Default::default()
            },
            broadcast: UnreliableConfig {
                max_message_size: 160,
                max_packet_size: 200,
                ..Default::default()
            },
        }
    }
}

// ─── PeerLink ───────────────────────────────────────────────────────────────

/// The three reliable endpoints serving one peer, plus handshake state and
/// the leased carrier slot (server side).
pub struct PeerLink {
    pub peer: PeerId,
    pub role: Role,
    pub small: SharedEndpoint,
    pub mid: SharedEndpoint,
    pub big: SharedEndpoint,
    /// Big-lane slot leased from the pool, returned on detach.
    pub slot: Option<u8>,
    /// Set once the peer's handshake literal arrives.
    pub ready: bool,
}

impl PeerLink {
    /// Build and wire the endpoint set. `small_tx`/`mid_tx`/`big_tx` are
    /// the carriers this side transmits on; lanes without one stay silent
    /// and ack through the piggyback.
    pub fn new(
        peer: PeerId,
        role: Role,
        profiles: &LaneProfiles,
        small_tx: Option<&SharedCarrier>,
        mid_tx: Option<&SharedCarrier>,
        big_tx: Option<&SharedCarrier>,
        hub: &Rc<RefCell<SignalHub>>,
        stats: &SharedStats,
    ) -> Self {
        let small = Rc::new(RefCell::new(ReliableEndpoint::new(profiles.small.clone())));
        let mid = Rc::new(RefCell::new(ReliableEndpoint::new(profiles.mid.clone())));
        let big = Rc::new(RefCell::new(ReliableEndpoint::new(profiles.big.clone())));

        for (ep, carrier) in [(&small, small_tx), (&mid, mid_tx), (&big, big_tx)] {
            if let Some(c) = carrier {
                wire_transmit(ep, peer, c, stats);
            }
            wire_receive(ep, peer, hub, stats);
        }

        // Piggyback pairing: the lane we receive on lends its ack header
        // to Mid; inbound secondary words feed the lane we send on.
        let (ack_source, ack_target) = match role {
            Role::Server => (&small, &big),
            Role::Client => (&big, &small),
        };
        {
            let source = ack_source.clone();
            mid.borrow_mut().set_second_header_getter(Box::new(move || {
                source.borrow_mut().take_pending_ack_header()
            }));
        }
        {
            let target = ack_target.clone();
            mid.borrow_mut()
                .set_second_header_callback(Box::new(move |now, word| {
                    target.borrow_mut().on_receive_frame(now, word, None);
                }));
        }

        PeerLink {
            peer,
            role,
            small,
            mid,
            big,
            slot: None,
            ready: false,
        }
    }

    /// Transition every endpoint for this peer to transmitting. Invoked on
    /// first receipt of the handshake literal; idempotent.
    pub fn unlock(&mut self) {
        self.ready = true;
        self.small.borrow_mut().unlock_transmission();
        self.mid.borrow_mut().unlock_transmission();
        self.big.borrow_mut().unlock_transmission();
    }

    /// Tick the lanes this side transmits on. Receive-only lanes have no
    /// timers worth driving — they cannot emit.
    pub fn tick(&self, now: u64) {
        self.mid.borrow_mut().tick(now);
        match self.role {
            Role::Server => self.big.borrow_mut().tick(now),
            Role::Client => self.small.borrow_mut().tick(now),
        }
    }
}

// ─── Wiring helpers ─────────────────────────────────────────────────────────

/// Outbound hook: serialize the frame, enforce the carrier budget, ship.
fn wire_transmit(ep: &SharedEndpoint, peer: PeerId, carrier: &SharedCarrier, stats: &SharedStats) {
    let carrier = carrier.clone();
    let stats = stats.clone();
    ep.borrow_mut()
        .set_transmit_callback(Box::new(move |header, payload| {
            let frame = wire::encode_frame(header, payload.as_ref());
            let budget = carrier.borrow().byte_budget();
            if frame.len() > budget {
                warn!(peer, size = frame.len(), budget, "frame over carrier budget, dropped");
                stats.borrow_mut().frames_dropped_budget += 1;
                return;
            }
            carrier.borrow_mut().transmit(peer, frame);
        }));
}

/// Inbound hook: drain delivered messages, decode events, fire listeners.
fn wire_receive(
    ep: &SharedEndpoint,
    peer: PeerId,
    hub: &Rc<RefCell<SignalHub>>,
    stats: &SharedStats,
) {
    let hub = hub.clone();
    let stats = stats.clone();
    ep.borrow_mut().set_receive_callback(Box::new(move |queue| {
        while let Some(message) = queue.pop() {
            match event::decode_event(&message) {
                Some((name, args)) => SignalHub::fire(&hub, peer, &name, args),
                None => {
                    warn!(peer, "undecodable event message dropped");
                    stats.borrow_mut().malformed_events += 1;
                }
            }
        }
    }));
}

/// Wire an unreliable endpoint's delivery path into the hub (Broadcast
/// lane receive side).
pub fn wire_unreliable_receive(
    ep: &mut weft_transport::unreliable::UnreliableEndpoint,
    peer: PeerId,
    hub: &Rc<RefCell<SignalHub>>,
    stats: &SharedStats,
) {
    let hub = hub.clone();
    let stats = stats.clone();
    ep.set_receive_callback(Box::new(move |queue| {
        while let Some(message) = queue.pop() {
            match event::decode_event(&message) {
                Some((name, args)) => SignalHub::fire(&hub, peer, &name, args),
                None => {
                    warn!(peer, "undecodable broadcast message dropped");
                    stats.borrow_mut().malformed_events += 1;
                }
            }
        }
    }));
}

/// Wire an unreliable endpoint's transmit path to a carrier (Broadcast
/// lane send side).
pub fn wire_unreliable_transmit(
    ep: &mut weft_transport::unreliable::UnreliableEndpoint,
    carrier: &SharedCarrier,
    stats: &SharedStats,
) {
    let carrier = carrier.clone();
    let stats = stats.clone();
    ep.set_transmit_callback(Box::new(move |header, payload| {
        let frame = wire::encode_frame(header, payload.as_ref());
        let budget = carrier.borrow().byte_budget();
        if frame.len() > budget {
            warn!(size = frame.len(), budget, "broadcast frame over carrier budget, dropped");
            stats.borrow_mut().frames_dropped_budget += 1;
            return;
        }
        // Broadcast carriers fan out; the peer argument is moot.
        carrier.borrow_mut().transmit(0, frame);
    }));
}
