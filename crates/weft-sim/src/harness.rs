//! Two reliable endpoints back-to-back over a pair of impaired links,
//! driven by a deterministic tick loop.

use bytes::Bytes;
use std::cell::RefCell;
use std::rc::Rc;

use weft_transport::endpoint::{ReliableConfig, ReliableEndpoint};

use crate::impairment::{ImpairedLink, ImpairmentConfig};

type SharedLink = Rc<RefCell<ImpairedLink>>;
type Delivered = Rc<RefCell<Vec<Bytes>>>;

/// A bidirectional endpoint pair with independent impairment per
/// direction. Time advances in fixed steps of the configured update
/// interval; nothing here touches a real clock.
pub struct DuplexHarness {
    pub a: ReliableEndpoint,
    pub b: ReliableEndpoint,
    a_to_b: SharedLink,
    b_to_a: SharedLink,
    a_delivered: Delivered,
    b_delivered: Delivered,
    step: u64,
    now: u64,
}

impl DuplexHarness {
    pub fn new(config: ReliableConfig, forward: ImpairmentConfig, reverse: ImpairmentConfig) -> Self {
        let step = config.update_interval;
        let a_to_b = Rc::new(RefCell::new(ImpairedLink::new(forward)));
        let b_to_a = Rc::new(RefCell::new(ImpairedLink::new(reverse)));

        let (a, a_delivered) = Self::endpoint(config.clone(), &a_to_b);
        let (b, b_delivered) = Self::endpoint(config, &b_to_a);

        DuplexHarness {
            a,
            b,
            a_to_b,
            b_to_a,
            a_delivered,
            b_delivered,
            step,
            now: 0,
        }
    }

    fn endpoint(config: ReliableConfig, outbound: &SharedLink) -> (ReliableEndpoint, Delivered) {
        let mut ep = ReliableEndpoint::new(config);
        ep.unlock_transmission();

        let link = outbound.clone();
        ep.set_transmit_callback(Box::new(move |h, p| link.borrow_mut().push((h, p))));

        let delivered: Delivered = Rc::new(RefCell::new(Vec::new()));
        let sink = delivered.clone();
        ep.set_receive_callback(Box::new(move |q| sink.borrow_mut().extend(q.drain())));

        (ep, delivered)
    }

    /// One tick on both endpoints, then both links flush.
    pub fn step(&mut self) {
        self.a.tick(self.now);
        self.b.tick(self.now);
        for (h, p) in self.a_to_b.borrow_mut().drain() {
            self.b.on_receive_frame(self.now, h, p);
        }
        for (h, p) in self.b_to_a.borrow_mut().drain() {
            self.a.on_receive_frame(self.now, h, p);
        }
        self.now += self.step;
    }

    /// Step until `b` has delivered `expect` messages, up to `max_ticks`.
    /// Returns the ticks used, or `None` on non-convergence.
    pub fn run_until_b_delivers(&mut self, expect: usize, max_ticks: u64) -> Option<u64> {
        for tick in 0..max_ticks {
            self.step();
            if self.b_delivered.borrow().len() >= expect {
                return Some(tick + 1);
            }
        }
        None
    }

    pub fn a_delivered(&self) -> Vec<Bytes> {
        self.a_delivered.borrow().clone()
    }

    pub fn b_delivered(&self) -> Vec<Bytes> {
        self.b_delivered.borrow().clone()
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    /// Frames the forward link has swallowed so far.
    pub fn forward_dropped(&self) -> u64 {
        self.a_to_b.borrow().dropped
    }
}
