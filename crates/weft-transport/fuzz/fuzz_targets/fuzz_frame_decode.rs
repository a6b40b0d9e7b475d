#![no_main]

use libfuzzer_sys::fuzz_target;
use weft_transport::wire::{decode_batch, decode_frame, encode_frame, split, FrameHeader};

/// Fuzz the wire parsing pipeline.
///
/// This target exercises:
/// - frame decode with arbitrary bytes
/// - batch decode with arbitrary bytes
/// - header split on arbitrary words
///
/// The parsers must never panic — only return `None` for invalid data.
fuzz_target!(|data: &[u8]| {
    // 1. Frame decode — must not panic.
    let decoded = decode_frame(data);

    // 2. Batch decode straight off the raw input — must not panic.
    let _ = decode_batch(&bytes::Bytes::copy_from_slice(data));

    if let Some((word, payload)) = decoded {
        // 3. Split on whatever word came off the wire — must not panic.
        let (primary, _secondary) = split(word);
        let _ = FrameHeader::decode(primary);

        // 4. Payload batch decode — must not panic.
        if let Some(p) = &payload {
            let _ = decode_batch(p);
        }

        // 5. Re-encode/decode stability for anything that parsed.
        let raw = encode_frame(word, payload.as_ref());
        let again = decode_frame(&raw);
        assert_eq!(again, Some((word, payload)), "re-encode/decode must agree");
    }
});
