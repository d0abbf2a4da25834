#![no_main]

use libfuzzer_sys::fuzz_target;
use ratchet_session::xeddsa::{verify, Signature, SIGNATURE_LENGTH};
use ratchet_session::PublicKey;

fuzz_target!(|data: &[u8]| {
    // Verify arbitrary signatures under arbitrary keys, including invalid points
    if data.len() >= 32 + SIGNATURE_LENGTH {
        let public = PublicKey::from_bytes(data[0..32].try_into().unwrap());
        let signature = Signature::from_bytes(data[32..32 + SIGNATURE_LENGTH].try_into().unwrap());
        let message = &data[32 + SIGNATURE_LENGTH..];

        let _ = verify(&public, message, &signature);
    }
});
