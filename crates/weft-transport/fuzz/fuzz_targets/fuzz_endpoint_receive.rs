#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use weft_transport::endpoint::{ReliableConfig, ReliableEndpoint};
use weft_transport::wire::decode_frame;

/// Feed an endpoint arbitrary inbound frames interleaved with ticks.
///
/// The endpoint must survive any byte stream: counters move, state stays
/// within its invariants (checked by the endpoint's debug assertions),
/// nothing panics.
fuzz_target!(|data: &[u8]| {
    let mut ep = ReliableEndpoint::new(ReliableConfig::default());
    ep.unlock_transmission();
    ep.set_transmit_callback(Box::new(|_, _| {}));
    ep.set_receive_callback(Box::new(|q| {
        while q.pop().is_some() {}
    }));

    let mut now = 0u64;
    for chunk in data.chunks(12) {
        now += 50;
        if let Some((header, payload)) = decode_frame(chunk) {
            ep.on_receive_frame(now, header, payload);
        } else if chunk.len() >= 4 {
            // Bypass the reserved-bit screen too: raw words straight in.
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let body = (chunk.len() > 4).then(|| Bytes::copy_from_slice(&chunk[4..]));
            ep.on_receive_frame(now, word, body);
        }
        ep.tick(now);
    }
});
