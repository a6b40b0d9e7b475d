//! # Signal hub
//!
//! The listener registry behind `connect`, with a breadth-first trampoline
//! for nested dispatches: a listener that fires further events while a
//! dispatch is already running enqueues them and returns, and the
//! outermost frame drains the queue FIFO. Recursion depth stays constant
//! no matter how listeners chain.
//!
//! Listeners are `Rc<RefCell<FnMut>>` so the hub itself is never borrowed
//! while one runs — that is what lets a listener call back into
//! [`SignalHub::fire`] at all.

use bytes::Bytes;
use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::carrier::PeerId;

pub type Listener = Rc<RefCell<dyn FnMut(PeerId, &Bytes)>>;

#[derive(Debug)]
struct PendingEvent {
    peer: PeerId,
    event: String,
    payload: Bytes,
}

#[derive(Default)]
pub struct SignalHub {
    listeners: HashMap<String, Vec<Listener>>,
    queue: VecDeque<PendingEvent>,
    dispatching: bool,
}

impl SignalHub {
    pub fn new() -> Rc<RefCell<SignalHub>> {
        Rc::new(RefCell::new(SignalHub::default()))
    }

    /// Subscribe to an event name.
    pub fn connect(&mut self, event: &str, listener: Listener) {
        self.listeners.entry(event.to_owned()).or_default().push(listener);
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.get(event).map_or(0, Vec::len)
    }

    /// Deliver an event to its listeners.
    ///
    /// When called from inside a running dispatch (i.e. from a listener),
    /// the event is queued and delivered by the outer frame after the
    /// current event's listeners finish — breadth-first, never recursive.
    pub fn fire(hub: &Rc<RefCell<SignalHub>>, peer: PeerId, event: &str, payload: Bytes) {
        {
            let mut h = hub.borrow_mut();
            h.queue.push_back(PendingEvent {
                peer,
                event: event.to_owned(),
                payload,
            });
            if h.dispatching {
                return;
            }
            h.dispatching = true;
        }

        loop {
            let next = hub.borrow_mut().queue.pop_front();
            let Some(pending) = next else {
                break;
            };
            // Clone the listener list out so the hub is free while the
            // listeners run.
            let listeners: Vec<Listener> = hub
                .borrow()
                .listeners
                .get(&pending.event)
                .cloned()
                .unwrap_or_default();
            for listener in listeners {
                (listener.borrow_mut())(pending.peer, &pending.payload);
            }
        }

        hub.borrow_mut().dispatching = false;
    }
}
