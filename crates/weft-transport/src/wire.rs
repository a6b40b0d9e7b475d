//! # Wire format
//!
//! Every frame is one 32-bit little-endian header word plus an optional
//! payload carrying exactly one packet (a batch of length-prefixed
//! messages). The header word is bit-packed:
//!
//! ```text
//!  bits  0..8   SACK    bitmap over seq in {ack+1 .. ack+8}
//!  bits  8..12  ACK     cumulative ack: next expected seq - 1
//!  bit   12     DATA    frame carries a payload packet
//!  bit   13     SECOND  a secondary header occupies bits 18..30
//!  bits 14..18  SEQ     payload packet seq (valid only if DATA)
//!  bits 18..26  SACK2   secondary header's SACK
//!  bits 26..30  ACK2    secondary header's ACK
//!  bits 30..32  reserved, must be zero
//! ```
//!
//! The secondary header is how one endpoint's ack rides piggyback inside
//! another endpoint's frame when the first has no carrier of its own.
//!
//! The unreliable sibling uses a flat layout in the same word: byte 0 is
//! the sequence counter, bytes 2..4 the sender's millisecond timestamp.

use bytes::{Buf, BufMut, Bytes, BytesMut};

// ─── Bit-range primitives ───────────────────────────────────────────────────

/// Mask of `width` low bits.
#[inline]
pub fn mask(width: u32) -> u32 {
    if width >= 32 {
        u32::MAX
    } else {
        (1u32 << width) - 1
    }
}

/// Read `width` bits of `word` starting at bit `lo`.
#[inline]
pub fn extract(word: u32, lo: u32, width: u32) -> u32 {
    (word >> lo) & mask(width)
}

/// Return `word` with bits `lo..lo+width` replaced by `value`
/// (masked to `width`). Other bits are untouched.
#[inline]
pub fn replace(word: u32, lo: u32, width: u32, value: u32) -> u32 {
    let m = mask(width) << lo;
    (word & !m) | ((value << lo) & m)
}

// ─── Field positions ────────────────────────────────────────────────────────

const SACK_LO: u32 = 0;
const SACK_W: u32 = 8;
const ACK_LO: u32 = 8;
const ACK_W: u32 = 4;
const DATA_BIT: u32 = 12;
const SECOND_BIT: u32 = 13;
const SEQ_LO: u32 = 14;
const SEQ_W: u32 = 4;
const SACK2_LO: u32 = 18;
const ACK2_LO: u32 = 26;
const RESERVED_LO: u32 = 30;

/// Encoded size of the header word on the wire.
pub const HEADER_SIZE: usize = 4;

// ─── Reliable frame header ──────────────────────────────────────────────────

/// The primary header fields of a reliable frame.
///
/// `seq` is `Some` exactly when the frame carries a payload packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Cumulative ack: next expected receive seq minus one.
    pub ack: u8,
    /// Selective-ack bitmap; bit `i` covers seq `ack + 1 + i`.
    pub sack: u8,
    /// Sequence number of the carried packet, if any.
    pub seq: Option<u8>,
}

impl FrameHeader {
    /// Pack into a header word. SECOND is left clear; use [`merge`] to
    /// attach a secondary header.
    pub fn encode(&self) -> u32 {
        let mut w = 0u32;
        w = replace(w, SACK_LO, SACK_W, self.sack as u32);
        w = replace(w, ACK_LO, ACK_W, self.ack as u32);
        if let Some(seq) = self.seq {
            w = replace(w, DATA_BIT, 1, 1);
            w = replace(w, SEQ_LO, SEQ_W, seq as u32);
        }
        w
    }

    /// Unpack the primary fields of a header word. Secondary fields are
    /// ignored; use [`split`] first when SECOND may be set.
    pub fn decode(word: u32) -> FrameHeader {
        let seq = if extract(word, DATA_BIT, 1) == 1 {
            Some(extract(word, SEQ_LO, SEQ_W) as u8)
        } else {
            None
        };
        FrameHeader {
            ack: extract(word, ACK_LO, ACK_W) as u8,
            sack: extract(word, SACK_LO, SACK_W) as u8,
            seq,
        }
    }

    /// Whether a secondary header is packed into the word.
    #[inline]
    pub fn has_second(word: u32) -> bool {
        extract(word, SECOND_BIT, 1) == 1
    }
}

/// Split a header word into its primary word and, when SECOND is set, the
/// piggybacked secondary reconstructed as a standalone ack-only word.
pub fn split(word: u32) -> (u32, Option<u32>) {
    if !FrameHeader::has_second(word) {
        return (word, None);
    }
    let second_sack = extract(word, SACK2_LO, SACK_W);
    let second_ack = extract(word, ACK2_LO, ACK_W);
    let mut secondary = 0u32;
    secondary = replace(secondary, SACK_LO, SACK_W, second_sack);
    secondary = replace(secondary, ACK_LO, ACK_W, second_ack);

    let mut primary = word;
    primary = replace(primary, SECOND_BIT, 1, 0);
    primary = replace(primary, SACK2_LO, SACK_W, 0);
    primary = replace(primary, ACK2_LO, ACK_W, 0);
    (primary, Some(secondary))
}

/// Pack `secondary`'s SACK and ACK fields into bits 18..30 of `primary`
/// and set SECOND. Inverse of [`split`]: `merge(p, s) == original` for any
/// legal word split into `(p, Some(s))`.
pub fn merge(primary: u32, secondary: u32) -> u32 {
    let mut w = primary;
    w = replace(w, SECOND_BIT, 1, 1);
    w = replace(w, SACK2_LO, SACK_W, extract(secondary, SACK_LO, SACK_W));
    w = replace(w, ACK2_LO, ACK_W, extract(secondary, ACK_LO, ACK_W));
    w
}

// ─── Unreliable datagram header ─────────────────────────────────────────────

/// Header layout of the unreliable sibling: a bare sequence counter and
/// the sender's clock, low 16 bits of milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    pub seq: u8,
    pub timestamp_ms: u16,
}

impl DatagramHeader {
    pub fn encode(&self) -> u32 {
        self.seq as u32 | (self.timestamp_ms as u32) << 16
    }

    pub fn decode(word: u32) -> DatagramHeader {
        DatagramHeader {
            seq: extract(word, 0, 8) as u8,
            timestamp_ms: extract(word, 16, 16) as u16,
        }
    }
}

// ─── Frame byte form ────────────────────────────────────────────────────────

/// Serialize a frame: 4-byte little-endian header word, then the payload.
pub fn encode_frame(header: u32, payload: Option<&Bytes>) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.map_or(0, |p| p.len()));
    buf.put_u32_le(header);
    if let Some(p) = payload {
        buf.put_slice(p);
    }
    buf.freeze()
}

/// Parse a reliable-layout frame from raw carrier bytes.
///
/// Returns `None` for short frames and for nonzero reserved bits. The
/// reserved-bit check doubles as the guard that keeps the raw handshake
/// literal from ever parsing as a frame.
pub fn decode_frame(raw: &[u8]) -> Option<(u32, Option<Bytes>)> {
    let (header, payload) = decode_datagram_frame(raw)?;
    if extract(header, RESERVED_LO, 2) != 0 {
        return None;
    }
    Some((header, payload))
}

/// Parse a datagram-layout frame: same byte form, but the full header
/// word is live (the unreliable timestamp occupies the high bits), so
/// there is no reserved-bit screen.
pub fn decode_datagram_frame(raw: &[u8]) -> Option<(u32, Option<Bytes>)> {
    let mut buf = raw;
    if buf.remaining() < HEADER_SIZE {
        return None;
    }
    let header = buf.get_u32_le();
    let payload = if buf.has_remaining() {
        Some(Bytes::copy_from_slice(buf.chunk()))
    } else {
        None
    };
    Some((header, payload))
}

// ─── Message batches ────────────────────────────────────────────────────────

/// Most messages a single packet may carry; keeps count framing to 1 byte.
pub const MAX_BATCH_MESSAGES: usize = 15;

/// Wire cost of one message inside a batch beyond its own bytes.
pub const MESSAGE_OVERHEAD: usize = 2;

/// Wire cost of the batch itself (the count byte).
pub const BATCH_OVERHEAD: usize = 1;

/// The measured size of a message for packet-budget arithmetic.
#[inline]
pub fn measured_size(message: &Bytes) -> usize {
    message.len() + MESSAGE_OVERHEAD
}

/// Encode a batch: `u8` count, then per message a `u16` LE length prefix
/// and the raw bytes. Callers keep `messages.len() <= MAX_BATCH_MESSAGES`.
pub fn encode_batch(messages: &[Bytes]) -> Bytes {
    debug_assert!(messages.len() <= MAX_BATCH_MESSAGES);
    let total: usize = BATCH_OVERHEAD + messages.iter().map(measured_size).sum::<usize>();
    let mut buf = BytesMut::with_capacity(total);
    buf.put_u8(messages.len() as u8);
    for m in messages {
        buf.put_u16_le(m.len() as u16);
        buf.put_slice(m);
    }
    buf.freeze()
}

/// Decode a batch. Total: returns `None` on truncation, trailing garbage,
/// or an over-long count — never panics.
pub fn decode_batch(raw: &Bytes) -> Option<Vec<Bytes>> {
    let mut buf = &raw[..];
    if !buf.has_remaining() {
        return None;
    }
    let count = buf.get_u8() as usize;
    if count > MAX_BATCH_MESSAGES {
        return None;
    }
    let mut messages = Vec::with_capacity(count);
    let mut offset = BATCH_OVERHEAD;
    for _ in 0..count {
        if buf.remaining() < MESSAGE_OVERHEAD {
            return None;
        }
        let len = buf.get_u16_le() as usize;
        if buf.remaining() < len {
            return None;
        }
        offset += MESSAGE_OVERHEAD;
        messages.push(raw.slice(offset..offset + len));
        buf.advance(len);
        offset += len;
    }
    if buf.has_remaining() {
        return None;
    }
    Some(messages)
}
