//! # Event facade
//!
//! The drop-in replacement for a stock event API: named events in, named
//! events out, with the transport underneath. Arguments are the opaque
//! bytes the collaborator serializer produced; the facade frames them
//! with the event name, validates at the boundary, and hands the result
//! to the dispatcher's size-based routing.

use bytes::Bytes;
use std::cell::RefCell;
use std::rc::Rc;

use crate::carrier::{Lane, PeerId};
use crate::dispatcher::{
    AttachError, ClientCarriers, ClientDispatcher, DispatchStats, DispatcherConfig,
    ServerCarriers, ServerDispatcher, SubmitError,
};
use crate::event::{self, MAX_EVENT_NAME};

/// Boundary validation shared by both sides: empty names are the nil
/// argument of the source API, oversized names cannot be framed.
fn frame_event(name: &str, args: &Bytes) -> Result<Bytes, SubmitError> {
    if name.is_empty() {
        return Err(SubmitError::NilArgument);
    }
    if name.len() > MAX_EVENT_NAME {
        return Err(SubmitError::TooLarge {
            size: name.len(),
            limit: MAX_EVENT_NAME,
        });
    }
    Ok(event::encode_event(name, args))
}

// ─── Server side ────────────────────────────────────────────────────────────

pub struct ServerMessenger {
    dispatcher: ServerDispatcher,
}

impl ServerMessenger {
    pub fn new(config: DispatcherConfig, carriers: ServerCarriers) -> Self {
        ServerMessenger {
            dispatcher: ServerDispatcher::new(config, carriers),
        }
    }

    /// Reliable broadcast: the event reaches every attached peer.
    pub fn broadcast_to_all(&mut self, name: &str, args: Bytes) -> Result<(), SubmitError> {
        let message = frame_event(name, &args)?;
        self.dispatcher.submit_to_all(message)
    }

    /// Reliable unicast.
    pub fn broadcast_to_peer(
        &mut self,
        peer: PeerId,
        name: &str,
        args: Bytes,
    ) -> Result<(), SubmitError> {
        let message = frame_event(name, &args)?;
        self.dispatcher.submit_to_peer(peer, message)
    }

    /// Best-effort broadcast over the unreliable lane.
    pub fn unreliable_broadcast_to_all(
        &mut self,
        name: &str,
        args: Bytes,
    ) -> Result<(), SubmitError> {
        let message = frame_event(name, &args)?;
        self.dispatcher.submit_unreliable(message)
    }

    /// Subscribe to an event name; the listener sees the sending peer.
    pub fn connect_for_peer(
        &mut self,
        name: &str,
        listener: impl FnMut(PeerId, &Bytes) + 'static,
    ) {
        self.dispatcher
            .hub()
            .borrow_mut()
            .connect(name, Rc::new(RefCell::new(listener)));
    }

    // Host-facing plumbing, forwarded to the dispatcher.

    pub fn peer_attached(&mut self, peer: PeerId) -> Result<(), AttachError> {
        self.dispatcher.peer_attached(peer)
    }

    pub fn peer_detached(&mut self, peer: PeerId) {
        self.dispatcher.peer_detached(peer)
    }

    pub fn handle_frame(&mut self, peer: PeerId, lane: Lane, raw: &[u8], now: u64) {
        self.dispatcher.handle_frame(peer, lane, raw, now)
    }

    pub fn tick(&mut self, now: u64) {
        self.dispatcher.tick(now)
    }

    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    pub fn dispatcher(&self) -> &ServerDispatcher {
        &self.dispatcher
    }
}

// ─── Client side ────────────────────────────────────────────────────────────

pub struct ClientMessenger {
    dispatcher: ClientDispatcher,
}

impl ClientMessenger {
    pub fn new(config: DispatcherConfig, carriers: ClientCarriers) -> Self {
        ClientMessenger {
            dispatcher: ClientDispatcher::new(config, carriers),
        }
    }

    /// Reliable client→server submission.
    pub fn broadcast_to_server(&mut self, name: &str, args: Bytes) -> Result<(), SubmitError> {
        let message = frame_event(name, &args)?;
        self.dispatcher.submit(message)
    }

    /// Subscribe to an event name.
    pub fn connect(&mut self, name: &str, mut listener: impl FnMut(&Bytes) + 'static) {
        self.dispatcher.hub().borrow_mut().connect(
            name,
            Rc::new(RefCell::new(move |_peer: PeerId, args: &Bytes| {
                listener(args)
            })),
        );
    }

    // Host-facing plumbing, forwarded to the dispatcher.

    pub fn handle_frame(&mut self, lane: Lane, raw: &[u8], now: u64) {
        self.dispatcher.handle_frame(lane, raw, now)
    }

    pub fn tick(&mut self, now: u64) {
        self.dispatcher.tick(now)
    }

    pub fn set_modal(&mut self, modal: bool) {
        self.dispatcher.set_modal(modal)
    }

    pub fn is_ready(&self) -> bool {
        self.dispatcher.is_ready()
    }

    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    pub fn dispatcher(&self) -> &ClientDispatcher {
        &self.dispatcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_event_name_is_nil_argument() {
        assert_eq!(
            frame_event("", &Bytes::new()).unwrap_err(),
            SubmitError::NilArgument
        );
    }

    #[test]
    fn giant_event_name_is_too_large() {
        let name = "x".repeat(300);
        assert!(matches!(
            frame_event(&name, &Bytes::new()).unwrap_err(),
            SubmitError::TooLarge { .. }
        ));
    }

    #[test]
    fn framed_event_decodes_back() {
        let framed = frame_event("fire", &Bytes::from_static(&[9])).unwrap();
        let (name, args) = event::decode_event(&framed).unwrap();
        assert_eq!(name, "fire");
        assert_eq!(args, Bytes::from_static(&[9]));
    }
}
