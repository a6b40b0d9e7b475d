//! # Integration tests: two reliable endpoints through the wire format
//!
//! No actual carrier I/O — the "network" is a queue of `(header, payload)`
//! frames passed directly between endpoints, with impairment (loss,
//! duplication, reorder) applied in the middle. Impairment is driven by a
//! seeded RNG so every run is reproducible.

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use weft_transport::endpoint::{ReliableConfig, ReliableEndpoint};
use weft_transport::wire;

// ─── Helpers ────────────────────────────────────────────────────────────────

type Wire = Rc<RefCell<VecDeque<(u32, Option<Bytes>)>>>;
type Delivered = Rc<RefCell<Vec<Bytes>>>;

/// Endpoint tuned for fast test convergence: large packets, short resend
/// timer.
fn test_config() -> ReliableConfig {
    ReliableConfig {
        seq_bits: 4,
        max_message_size: 150,
        max_packet_size: 1000,
        update_interval: 100,
        // Acks go out every idle tick; the resend timer sits well above
        // the ack round trip so zero-loss runs never retransmit.
        ack_timeout_factor: 1,
        packet_resend_delay_factor: 4,
    }
}

/// Build an unlocked endpoint whose outbound frames land on the returned
/// wire and whose delivered messages land in the returned sink.
fn endpoint(config: ReliableConfig) -> (ReliableEndpoint, Wire, Delivered) {
    let mut ep = ReliableEndpoint::new(config);
    ep.unlock_transmission();

    let wire: Wire = Rc::new(RefCell::new(VecDeque::new()));
    let tx = wire.clone();
    ep.set_transmit_callback(Box::new(move |h, p| tx.borrow_mut().push_back((h, p))));

    let delivered: Delivered = Rc::new(RefCell::new(Vec::new()));
    let sink = delivered.clone();
    ep.set_receive_callback(Box::new(move |q| sink.borrow_mut().extend(q.drain())));

    (ep, wire, delivered)
}

/// Move every frame from `wire` into `dst`, dropping each with probability
/// `loss` and duplicating each with probability `dup`.
fn transfer(wire: &Wire, dst: &mut ReliableEndpoint, now: u64, rng: &mut StdRng, loss: f64, dup: f64) {
    while let Some((h, p)) = wire.borrow_mut().pop_front() {
        if loss > 0.0 && rng.gen_bool(loss) {
            continue;
        }
        if dup > 0.0 && rng.gen_bool(dup) {
            dst.on_receive_frame(now, h, p.clone());
        }
        dst.on_receive_frame(now, h, p);
    }
}

fn message(tag: u8, n: u16) -> Bytes {
    let mut m = vec![0u8; 120];
    m[0] = tag;
    m[1] = (n >> 8) as u8;
    m[2] = n as u8;
    Bytes::from(m)
}

fn message_index(m: &Bytes) -> u16 {
    ((m[1] as u16) << 8) | m[2] as u16
}

/// Drive both endpoints until each side has delivered `expect` messages or
/// `max_ticks` elapse. Returns the number of ticks used.
fn run_duplex(
    a: &mut ReliableEndpoint,
    b: &mut ReliableEndpoint,
    a_wire: &Wire,
    b_wire: &Wire,
    a_delivered: &Delivered,
    b_delivered: &Delivered,
    expect: usize,
    max_ticks: u64,
    rng: &mut StdRng,
    loss: f64,
) -> u64 {
    let step = 100;
    for tick in 0..max_ticks {
        let now = tick * step;
        a.tick(now);
        b.tick(now);
        transfer(a_wire, b, now, rng, loss, 0.0);
        transfer(b_wire, a, now, rng, loss, 0.0);
        if a_delivered.borrow().len() >= expect && b_delivered.borrow().len() >= expect {
            return tick + 1;
        }
    }
    max_ticks
}

/// Drive a one-directional flow (b only ever acks) until `b` has
/// delivered `expect` messages or the tick budget runs out. Returns the
/// ticks used, or `max_ticks` on non-convergence.
fn run_one_way(
    a: &mut ReliableEndpoint,
    b: &mut ReliableEndpoint,
    a_wire: &Wire,
    b_wire: &Wire,
    b_delivered: &Delivered,
    expect: usize,
    max_ticks: u64,
    rng: &mut StdRng,
    loss: f64,
) -> u64 {
    for tick in 0..max_ticks {
        let now = tick * 100;
        a.tick(now);
        b.tick(now);
        transfer(a_wire, b, now, rng, loss, 0.0);
        transfer(b_wire, a, now, rng, loss, 0.0);
        if b_delivered.borrow().len() >= expect {
            return tick + 1;
        }
    }
    max_ticks
}

fn assert_in_order(delivered: &Delivered, tag: u8, expect: usize) {
    let got = delivered.borrow();
    assert_eq!(got.len(), expect, "tag {tag}: wrong delivery count");
    for (i, m) in got.iter().enumerate() {
        assert_eq!(m[0], tag, "message {i} from the wrong sender");
        assert_eq!(
            message_index(m) as usize,
            i,
            "delivery order broken at index {i}"
        );
    }
}

// ─── Zero loss ──────────────────────────────────────────────────────────────

#[test]
fn zero_loss_fifty_messages_each_way() {
    let (mut a, a_wire, a_delivered) = endpoint(test_config());
    let (mut b, b_wire, b_delivered) = endpoint(test_config());
    let mut rng = StdRng::seed_from_u64(1);

    for n in 0..50 {
        a.send(message(0xAA, n)).unwrap();
        b.send(message(0xBB, n)).unwrap();
    }

    let ticks = run_duplex(
        &mut a, &mut b, &a_wire, &b_wire, &a_delivered, &b_delivered, 50, 100, &mut rng, 0.0,
    );
    assert!(ticks <= 20, "zero-loss run took {ticks} ticks");
    assert_in_order(&b_delivered, 0xAA, 50);
    assert_in_order(&a_delivered, 0xBB, 50);
    assert_eq!(a.stats().packets_resent, 0);
    assert_eq!(b.stats().packets_resent, 0);
}

#[test]
fn window_wraps_three_times_in_order() {
    // 64 packets in a 16-value space: ack_expected crosses the modulus
    // four times and delivery order survives every wrap.
    let mut config = test_config();
    config.max_packet_size = 130; // exactly one 120-byte message per packet
    let (mut a, a_wire, a_delivered) = endpoint(config.clone());
    let (mut b, b_wire, b_delivered) = endpoint(config);
    let mut rng = StdRng::seed_from_u64(2);

    for n in 0..64 {
        a.send(message(0xAA, n)).unwrap();
    }
    let ticks = run_one_way(
        &mut a, &mut b, &a_wire, &b_wire, &b_delivered, 64, 200, &mut rng, 0.0,
    );
    assert!(ticks < 200, "wraparound run did not converge");
    assert_eq!(a_delivered.borrow().len(), 0);
    assert_in_order(&b_delivered, 0xAA, 64);
    assert_eq!(a.out_buffered(), 0, "send window fully drained");
    assert_eq!(a.ack_expected(), a.next_to_send());
}

// ─── Uniform loss ───────────────────────────────────────────────────────────

#[test]
fn half_loss_thousand_messages_each_way() {
    let (mut a, a_wire, a_delivered) = endpoint(test_config());
    let (mut b, b_wire, b_delivered) = endpoint(test_config());
    let mut rng = StdRng::seed_from_u64(3);

    for n in 0..1000 {
        a.send(message(0xAA, n)).unwrap();
        b.send(message(0xBB, n)).unwrap();
    }

    // Zero-loss baseline is ~140 ticks; the 200× budget of the contract
    // is far above what this should need.
    let ticks = run_duplex(
        &mut a, &mut b, &a_wire, &b_wire, &a_delivered, &b_delivered, 1000, 28_000, &mut rng, 0.5,
    );
    assert!(ticks < 28_000, "50% loss run did not converge");
    assert_in_order(&b_delivered, 0xAA, 1000);
    assert_in_order(&a_delivered, 0xBB, 1000);
}

#[test]
fn extreme_loss_hundred_messages_completes() {
    let (mut a, a_wire, _) = endpoint(test_config());
    let (mut b, b_wire, b_delivered) = endpoint(test_config());
    let mut rng = StdRng::seed_from_u64(4);

    for n in 0..100 {
        a.send(message(0xAA, n)).unwrap();
    }

    let ticks = run_one_way(
        &mut a, &mut b, &a_wire, &b_wire, &b_delivered, 100, 50_000, &mut rng, 0.95,
    );
    assert!(ticks < 50_000, "95% loss run did not converge");
    assert_in_order(&b_delivered, 0xAA, 100);

    // Expectation is 1/(1-loss) = 20 transmissions per packet; allow a
    // generous factor for ack-path loss.
    let delivered_packets = b.stats().packets_delivered.max(1);
    let per_packet = a.stats().packets_resent as f64 / delivered_packets as f64;
    assert!(
        per_packet < 80.0,
        "resend amplification {per_packet} out of bounds"
    );
}

// ─── Duplication & reorder ──────────────────────────────────────────────────

#[test]
fn duplicated_frames_never_double_deliver() {
    let (mut a, a_wire, a_delivered) = endpoint(test_config());
    let (mut b, b_wire, b_delivered) = endpoint(test_config());
    let mut rng = StdRng::seed_from_u64(5);

    for n in 0..200 {
        a.send(message(0xAA, n)).unwrap();
    }
    for tick in 0..400u64 {
        let now = tick * 100;
        a.tick(now);
        b.tick(now);
        // Every frame has a 40% chance of arriving twice.
        transfer(&a_wire, &mut b, now, &mut rng, 0.0, 0.4);
        transfer(&b_wire, &mut a, now, &mut rng, 0.0, 0.4);
        if b_delivered.borrow().len() >= 200 {
            break;
        }
    }
    assert_in_order(&b_delivered, 0xAA, 200);
    assert!(b.stats().duplicates > 0, "impairment duplicated something");
    assert!(a_delivered.borrow().is_empty());
}

#[test]
fn replayed_single_frame_bumps_duplicate_counter_only() {
    let (mut a, a_wire, _) = endpoint(test_config());
    let (mut b, _, b_delivered) = endpoint(test_config());

    a.send(message(0xAA, 0)).unwrap();
    a.tick(0);
    let frame = a_wire.borrow_mut().pop_front().unwrap();

    b.on_receive_frame(0, frame.0, frame.1.clone());
    assert_eq!(b_delivered.borrow().len(), 1);
    let dups_before = b.stats().duplicates;

    b.on_receive_frame(10, frame.0, frame.1);
    assert_eq!(b_delivered.borrow().len(), 1, "delivery stream unchanged");
    assert_eq!(b.stats().duplicates, dups_before + 1);
}

#[test]
fn scrambled_arrival_order_is_repaired() {
    let mut config = test_config();
    config.max_packet_size = 130; // one message per packet
    let (mut a, a_wire, _) = endpoint(config.clone());
    let (mut b, _, b_delivered) = endpoint(config);

    for n in 0..5 {
        a.send(message(0xAA, n)).unwrap();
        a.tick(n as u64);
    }
    let frames: Vec<_> = a_wire.borrow_mut().drain(..).collect();
    assert_eq!(frames.len(), 5);

    // Deliver seqs in the order [3, 1, 2, 4, 0].
    for &i in &[3usize, 1, 2, 4, 0] {
        let (h, p) = frames[i].clone();
        b.on_receive_frame(100, h, p);
    }
    assert_in_order(&b_delivered, 0xAA, 5);
}

// ─── Piggybacked secondary header ───────────────────────────────────────────

/// One-directional lane: the receiving side never transmits a primary
/// frame; its acks ride in the secondary header of a paired lane.
#[test]
fn send_window_advances_on_piggybacked_acks_alone() {
    // big lane: tx → rx, rx has no transmit hook at all.
    let big_tx = Rc::new(RefCell::new(ReliableEndpoint::new(test_config())));
    let big_rx = Rc::new(RefCell::new(ReliableEndpoint::new(test_config())));
    big_tx.borrow_mut().unlock_transmission();
    big_rx.borrow_mut().unlock_transmission();

    let big_wire: Wire = Rc::new(RefCell::new(VecDeque::new()));
    {
        let tx = big_wire.clone();
        big_tx
            .borrow_mut()
            .set_transmit_callback(Box::new(move |h, p| tx.borrow_mut().push_back((h, p))));
    }
    let big_delivered: Delivered = Rc::new(RefCell::new(Vec::new()));
    {
        let sink = big_delivered.clone();
        big_rx
            .borrow_mut()
            .set_receive_callback(Box::new(move |q| sink.borrow_mut().extend(q.drain())));
    }

    // mid lane: runs alongside in the rx→tx direction and lends its
    // header bits to the big lane.
    let (mut mid_back, mid_wire, _) = endpoint(test_config());
    {
        let src = big_rx.clone();
        mid_back.set_second_header_getter(Box::new(move || {
            src.borrow_mut().take_pending_ack_header()
        }));
    }
    let mut mid_front = ReliableEndpoint::new(test_config());
    mid_front.unlock_transmission();
    {
        let dst = big_tx.clone();
        mid_front.set_second_header_callback(Box::new(move |now, word| {
            dst.borrow_mut().on_receive_frame(now, word, None);
        }));
    }

    for n in 0..30 {
        big_tx.borrow_mut().send(message(0xAA, n)).unwrap();
    }

    for tick in 0..200u64 {
        let now = tick * 100;
        big_tx.borrow_mut().tick(now);
        while let Some((h, p)) = big_wire.borrow_mut().pop_front() {
            big_rx.borrow_mut().on_receive_frame(now, h, p);
        }
        mid_back.tick(now);
        while let Some((h, p)) = mid_wire.borrow_mut().pop_front() {
            mid_front.on_receive_frame(now, h, p);
        }
        if big_delivered.borrow().len() >= 30 {
            break;
        }
    }

    assert_in_order(&big_delivered, 0xAA, 30);
    let tx = big_tx.borrow();
    assert_eq!(tx.out_buffered(), 0, "window advanced via piggyback only");
    assert!(tx.stats().packets_resent == 0 || tx.stats().packets_resent < 5);
    assert_eq!(big_rx.borrow().stats().frames_sent, 0, "rx never transmitted");
}

// ─── Oversize submit ────────────────────────────────────────────────────────

#[test]
fn oversize_submit_changes_nothing() {
    let (mut a, a_wire, _) = endpoint(test_config());
    let big = Bytes::from(vec![0u8; test_config().max_message_size + 1]);
    assert!(a.send(big).is_err());
    assert_eq!(a.send_depth(), 0);
    a.tick(0);
    // Nothing queued, ack not due at t=0: total silence.
    assert!(a_wire.borrow().is_empty());
    assert_eq!(a.stats().packets_sent, 0);
}

// ─── Batch framing on the wire ──────────────────────────────────────────────

#[test]
fn frame_bytes_round_trip_through_carrier_form() {
    let (mut a, a_wire, _) = endpoint(test_config());
    a.send(message(0xAA, 0)).unwrap();
    a.tick(0);
    let (h, p) = a_wire.borrow_mut().pop_front().unwrap();

    // What a carrier would do: serialize, ship, reparse.
    let raw = wire::encode_frame(h, p.as_ref());
    let (h2, p2) = wire::decode_frame(&raw).unwrap();
    assert_eq!(h, h2);
    assert_eq!(p, p2);
}
