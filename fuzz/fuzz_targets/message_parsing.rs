//! Fuzz target for message and handshake envelope parsing
//!
//! Arbitrary bytes must either parse or fail cleanly, and whatever parses
//! must encode back to the same bytes

#![no_main]

use libfuzzer_sys::fuzz_target;
use ratchet_session::{Envelope, HandshakeEnvelope, Header};

fuzz_target!(|data: &[u8]| {
    if let Ok(envelope) = Envelope::from_bytes(data) {
        assert_eq!(envelope.to_bytes(), data);
    }

    if let Ok(header) = Header::from_bytes(data) {
        assert_eq!(&header.to_bytes()[..], data);
    }

    if let Ok(handshake) = HandshakeEnvelope::from_bytes(data) {
        assert_eq!(handshake.to_bytes(), data);
    }
});
