//! Event framing: what one protocol message looks like to the facade.
//!
//! A message is a named event plus the collaborator-serialized argument
//! bytes: `u8` name length, the name, then the arguments verbatim. The
//! dispatcher never looks inside the arguments.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// The reserved literal a peer sends, raw on the Mid carrier, to unlock
/// transmission. Frame decode rejects it (reserved header bits), so it can
/// never be mistaken for a frame.
pub const HANDSHAKE: &[u8] = b"<~READY!~>";

/// Longest event name the `u8` length prefix can carry.
pub const MAX_EVENT_NAME: usize = 255;

/// Frame an event into one protocol message.
pub fn encode_event(name: &str, args: &Bytes) -> Bytes {
    debug_assert!(name.len() <= MAX_EVENT_NAME);
    let mut buf = BytesMut::with_capacity(1 + name.len() + args.len());
    buf.put_u8(name.len() as u8);
    buf.put_slice(name.as_bytes());
    buf.put_slice(args);
    buf.freeze()
}

/// Recover `(name, args)` from a delivered message. Returns `None` on
/// truncation or a non-UTF-8 name.
pub fn decode_event(message: &Bytes) -> Option<(String, Bytes)> {
    let mut buf = &message[..];
    if !buf.has_remaining() {
        return None;
    }
    let name_len = buf.get_u8() as usize;
    if buf.remaining() < name_len {
        return None;
    }
    let name = std::str::from_utf8(&buf[..name_len]).ok()?.to_owned();
    let args = message.slice(1 + name_len..);
    Some((name, args))
}

/// Wire size of an event before batch framing.
pub fn event_size(name: &str, args: &Bytes) -> usize {
    1 + name.len() + args.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_roundtrip() {
        let args = Bytes::from_static(&[1, 2, 3]);
        let encoded = encode_event("player_moved", &args);
        assert_eq!(encoded.len(), event_size("player_moved", &args));
        let (name, got) = decode_event(&encoded).unwrap();
        assert_eq!(name, "player_moved");
        assert_eq!(got, args);
    }

    #[test]
    fn event_with_empty_args() {
        let encoded = encode_event("ping", &Bytes::new());
        let (name, args) = decode_event(&encoded).unwrap();
        assert_eq!(name, "ping");
        assert!(args.is_empty());
    }

    #[test]
    fn truncated_event_rejected() {
        let encoded = encode_event("abcdef", &Bytes::new());
        assert!(decode_event(&encoded.slice(0..3)).is_none());
        assert!(decode_event(&Bytes::new()).is_none());
    }

    #[test]
    fn handshake_is_ten_ascii_bytes() {
        assert_eq!(HANDSHAKE.len(), 10);
        assert!(HANDSHAKE.is_ascii());
    }
}
