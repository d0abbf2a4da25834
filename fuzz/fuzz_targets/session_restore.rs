//! Fuzz target for restoring session snapshots
//!
//! Corrupted blobs must be rejected, never panic or allocate unbounded memory

#![no_main]

use libfuzzer_sys::fuzz_target;
use ratchet_session::{Aes256GcmBackend, ChaCha20Poly1305Backend, Session, SessionConfig};

fuzz_target!(|data: &[u8]| {
    if let Ok(session) = Session::restore(Aes256GcmBackend, SessionConfig::default(), data) {
        // a restored session must be able to persist itself again
        let blob = session.serialize().expect("restored session serializes");
        Session::restore(Aes256GcmBackend, SessionConfig::default(), &blob)
            .expect("re-serialized session restores");
    }
    let _ = Session::restore(ChaCha20Poly1305Backend, SessionConfig::default(), data);
});
