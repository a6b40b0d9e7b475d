//! # Dispatchers
//!
//! The server dispatcher owns one [`PeerLink`] per attached peer plus a
//! shared unreliable broadcast endpoint; the client dispatcher owns the
//! single link to the server. Both route outbound events by measured
//! size, feed inbound carrier bytes to the right endpoint, and drive
//! every endpoint from one `tick(now)`.
//!
//! Inbound bytes are hostile until proven otherwise: unknown peers,
//! undecodable frames, and frames on lanes this side never receives on
//! are counted and dropped, never fatal.

use bytes::Bytes;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, warn};

use weft_transport::endpoint::SendError;
use weft_transport::unreliable::UnreliableEndpoint;
use weft_transport::wire;

use crate::carrier::{Lane, PeerId, SharedCarrier};
use crate::event::HANDSHAKE;
use crate::peer::{
    wire_unreliable_receive, wire_unreliable_transmit, LaneProfiles, PeerLink, Role,
};
use crate::pool::SlotPool;
use crate::signal::SignalHub;

// ─── Errors ─────────────────────────────────────────────────────────────────

/// Submission failures surfaced to the application.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("event of {size} bytes exceeds the {limit}-byte lane limit")]
    TooLarge { size: usize, limit: usize },
    #[error("peer {0} is not connected")]
    PeerNotConnected(PeerId),
    #[error("nil argument: event name must be non-empty")]
    NilArgument,
}

impl SubmitError {
    fn from_send(err: SendError) -> Self {
        match err {
            SendError::TooLarge { size, limit } => SubmitError::TooLarge { size, limit },
        }
    }
}

/// Peer attach failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttachError {
    #[error("no free carrier slot for peer {0}")]
    NoFreeSlot(PeerId),
    #[error("peer {0} is already attached")]
    AlreadyAttached(PeerId),
}

// ─── Stats ──────────────────────────────────────────────────────────────────

/// Dispatcher-level drop counters; endpoint-level counters live on the
/// endpoints themselves.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchStats {
    pub frames_in: u64,
    pub frames_dropped_decode: u64,
    pub frames_dropped_budget: u64,
    pub frames_dropped_unknown_peer: u64,
    pub frames_dropped_wrong_lane: u64,
    pub malformed_events: u64,
    pub handshakes_seen: u64,
}

pub type SharedStats = Rc<RefCell<DispatchStats>>;

// ─── Configuration ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub profiles: LaneProfiles,
    /// Small-lane queue depth at which client traffic spills to Mid.
    pub small_queue_threshold: usize,
    /// Keyed data slots available for Big lanes (server side).
    pub slot_capacity: u8,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            profiles: LaneProfiles::default(),
            small_queue_threshold: 4,
            slot_capacity: 32,
        }
    }
}

// ─── Server ─────────────────────────────────────────────────────────────────

/// Carriers a server transmits on.
pub struct ServerCarriers {
    pub mid: SharedCarrier,
    pub big: SharedCarrier,
    pub broadcast: SharedCarrier,
}

pub struct ServerDispatcher {
    config: DispatcherConfig,
    carriers: ServerCarriers,
    peers: HashMap<PeerId, PeerLink>,
    broadcast: UnreliableEndpoint,
    pool: SlotPool,
    hub: Rc<RefCell<SignalHub>>,
    stats: SharedStats,
}

impl ServerDispatcher {
    pub fn new(config: DispatcherConfig, carriers: ServerCarriers) -> Self {
        let hub = SignalHub::new();
        let stats: SharedStats = Rc::new(RefCell::new(DispatchStats::default()));

        // The broadcast lane is connectionless: no handshake gates it.
        let mut broadcast = UnreliableEndpoint::new(config.profiles.broadcast.clone());
        wire_unreliable_transmit(&mut broadcast, &carriers.broadcast, &stats);
        broadcast.unlock_transmission();

        let pool = SlotPool::new(config.slot_capacity);
        ServerDispatcher {
            config,
            carriers,
            peers: HashMap::new(),
            broadcast,
            pool,
            hub,
            stats,
        }
    }

    /// Build the endpoint set for a newly acknowledged peer, lease its
    /// Big-lane slot, and offer our handshake.
    pub fn peer_attached(&mut self, peer: PeerId) -> Result<(), AttachError> {
        if self.peers.contains_key(&peer) {
            return Err(AttachError::AlreadyAttached(peer));
        }
        let slot = self.pool.lease().ok_or(AttachError::NoFreeSlot(peer))?;

        let mut link = PeerLink::new(
            peer,
            Role::Server,
            &self.config.profiles,
            None,
            Some(&self.carriers.mid),
            Some(&self.carriers.big),
            &self.hub,
            &self.stats,
        );
        link.slot = Some(slot);
        self.peers.insert(peer, link);

        // The handshake literal travels raw, outside the frame format;
        // the remote unlocks its endpoints on first sight of it.
        self.carriers
            .mid
            .borrow_mut()
            .transmit(peer, Bytes::from_static(HANDSHAKE));
        debug!(peer, slot, "peer attached");
        Ok(())
    }

    /// Tear down a peer's endpoints and return its carrier slot.
    pub fn peer_detached(&mut self, peer: PeerId) {
        if let Some(link) = self.peers.remove(&peer) {
            if let Some(slot) = link.slot {
                self.pool.release(slot);
            }
            debug!(peer, "peer detached");
        }
    }

    /// Inbound bytes from the host, tagged with the lane they arrived on.
    pub fn handle_frame(&mut self, peer: PeerId, lane: Lane, raw: &[u8], now: u64) {
        self.stats.borrow_mut().frames_in += 1;
        let Some(link) = self.peers.get_mut(&peer) else {
            warn!(peer, "frame from unknown peer dropped");
            self.stats.borrow_mut().frames_dropped_unknown_peer += 1;
            return;
        };

        if raw == HANDSHAKE {
            if !link.ready {
                link.unlock();
                self.stats.borrow_mut().handshakes_seen += 1;
                debug!(peer, "handshake received, transmission unlocked");
            }
            return;
        }

        let endpoint = match lane {
            Lane::Small => &link.small,
            Lane::Mid => &link.mid,
            Lane::Big | Lane::Broadcast => {
                warn!(peer, ?lane, "server never receives on this lane");
                self.stats.borrow_mut().frames_dropped_wrong_lane += 1;
                return;
            }
        };
        match wire::decode_frame(raw) {
            Some((header, payload)) => {
                endpoint.borrow_mut().on_receive_frame(now, header, payload)
            }
            None => {
                self.stats.borrow_mut().frames_dropped_decode += 1;
            }
        }
    }

    /// Route one reliable event to a peer: Mid if it fits, Big otherwise.
    pub fn submit_to_peer(&mut self, peer: PeerId, message: Bytes) -> Result<(), SubmitError> {
        let link = self
            .peers
            .get_mut(&peer)
            .ok_or(SubmitError::PeerNotConnected(peer))?;
        let size = message.len();
        if size <= link.mid.borrow().config().max_message_size {
            link.mid.borrow_mut().send(message)
        } else {
            link.big.borrow_mut().send(message)
        }
        .map(|_| ())
        .map_err(SubmitError::from_send)
    }

    /// Reliable fan-out: the event goes to every attached peer. Size is
    /// validated once up front so the failure mode is all-or-nothing.
    pub fn submit_to_all(&mut self, message: Bytes) -> Result<(), SubmitError> {
        let size = message.len();
        let limit = self.config.profiles.big.max_message_size;
        if size > limit {
            return Err(SubmitError::TooLarge { size, limit });
        }
        let peers: Vec<PeerId> = self.peers.keys().copied().collect();
        for peer in peers {
            self.submit_to_peer(peer, message.clone())?;
        }
        Ok(())
    }

    /// Best-effort fan-out over the broadcast property.
    pub fn submit_unreliable(&mut self, message: Bytes) -> Result<(), SubmitError> {
        self.broadcast
            .send(message)
            .map(|_| ())
            .map_err(SubmitError::from_send)
    }

    /// Drive every endpoint once.
    pub fn tick(&mut self, now: u64) {
        for link in self.peers.values() {
            link.tick(now);
        }
        self.broadcast.tick(now);
    }

    pub fn hub(&self) -> &Rc<RefCell<SignalHub>> {
        &self.hub
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats.borrow().clone()
    }

    pub fn peer(&self, peer: PeerId) -> Option<&PeerLink> {
        self.peers.get(&peer)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn broadcast_endpoint(&self) -> &UnreliableEndpoint {
        &self.broadcast
    }
}

// ─── Client ─────────────────────────────────────────────────────────────────

/// Carriers a client transmits on.
pub struct ClientCarriers {
    pub small: SharedCarrier,
    pub mid: SharedCarrier,
}

/// The peer id a client uses for its server in listener callbacks.
pub const SERVER_PEER: PeerId = 0;

pub struct ClientDispatcher {
    config: DispatcherConfig,
    link: PeerLink,
    broadcast: UnreliableEndpoint,
    /// While the local player sits in a blocking modal state the ability
    /// carrier is unusable, so small traffic spills to Mid.
    modal: bool,
    hub: Rc<RefCell<SignalHub>>,
    stats: SharedStats,
}

impl ClientDispatcher {
    /// Build the link to the server and offer our handshake.
    pub fn new(config: DispatcherConfig, carriers: ClientCarriers) -> Self {
        let hub = SignalHub::new();
        let stats: SharedStats = Rc::new(RefCell::new(DispatchStats::default()));

        let link = PeerLink::new(
            SERVER_PEER,
            Role::Client,
            &config.profiles,
            Some(&carriers.small),
            Some(&carriers.mid),
            None,
            &hub,
            &stats,
        );

        let mut broadcast = UnreliableEndpoint::new(config.profiles.broadcast.clone());
        wire_unreliable_receive(&mut broadcast, SERVER_PEER, &hub, &stats);

        carriers
            .mid
            .borrow_mut()
            .transmit(SERVER_PEER, Bytes::from_static(HANDSHAKE));
        debug!("client link created, handshake offered");

        ClientDispatcher {
            config,
            link,
            broadcast,
            modal: false,
            hub,
            stats,
        }
    }

    /// Inbound bytes from the host, tagged with the lane they arrived on.
    pub fn handle_frame(&mut self, lane: Lane, raw: &[u8], now: u64) {
        self.stats.borrow_mut().frames_in += 1;

        if raw == HANDSHAKE {
            if !self.link.ready {
                self.link.unlock();
                self.stats.borrow_mut().handshakes_seen += 1;
                debug!("handshake received, transmission unlocked");
            }
            return;
        }

        match lane {
            Lane::Mid => self.decode_into(&self.link.mid.clone(), raw, now),
            Lane::Big => self.decode_into(&self.link.big.clone(), raw, now),
            Lane::Broadcast => match wire::decode_datagram_frame(raw) {
                Some((header, payload)) => {
                    self.broadcast.on_receive_frame(now, header, payload)
                }
                None => self.stats.borrow_mut().frames_dropped_decode += 1,
            },
            Lane::Small => {
                warn!("client never receives on the small lane");
                self.stats.borrow_mut().frames_dropped_wrong_lane += 1;
            }
        }
    }

    fn decode_into(&self, endpoint: &crate::peer::SharedEndpoint, raw: &[u8], now: u64) {
        match wire::decode_frame(raw) {
            Some((header, payload)) => endpoint.borrow_mut().on_receive_frame(now, header, payload),
            None => self.stats.borrow_mut().frames_dropped_decode += 1,
        }
    }

    /// Route one reliable event to the server: Small for tiny bursts when
    /// the lane is usable and shallow, Mid otherwise.
    pub fn submit(&mut self, message: Bytes) -> Result<(), SubmitError> {
        let size = message.len();
        let small_fits = size <= self.link.small.borrow().config().max_message_size;
        let small_open =
            !self.modal && self.link.small.borrow().send_depth() < self.config.small_queue_threshold;
        if small_fits && small_open {
            self.link.small.borrow_mut().send(message)
        } else {
            self.link.mid.borrow_mut().send(message)
        }
        .map(|_| ())
        .map_err(SubmitError::from_send)
    }

    /// Enter or leave a blocking modal state.
    pub fn set_modal(&mut self, modal: bool) {
        self.modal = modal;
    }

    pub fn tick(&mut self, now: u64) {
        self.link.tick(now);
    }

    pub fn hub(&self) -> &Rc<RefCell<SignalHub>> {
        &self.hub
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.link.ready
    }

    pub fn link(&self) -> &PeerLink {
        &self.link
    }

    pub fn broadcast_endpoint(&self) -> &UnreliableEndpoint {
        &self.broadcast
    }
}
