//! Fuzz target for session decryption with corrupted inputs
//!
//! A tampered message must fail without panicking and without disturbing
//! the receiving session

#![no_main]

use libfuzzer_sys::fuzz_target;
use rand_core::OsRng;
use ratchet_session::{
    Envelope, IdentityKeyPair, PreKeyConfig, PreKeyManager, Session, SessionConfig,
};

fuzz_target!(|data: &[u8]| {
    if data.len() < 3 {
        return;
    }
    let position = usize::from(data[0]) | (usize::from(data[1]) << 8);
    let flip = data[2];
    let plaintext = &data[3..];

    let mut bob_keys =
        PreKeyManager::new(IdentityKeyPair::generate(&mut OsRng), PreKeyConfig::default())
            .expect("default config is valid");
    bob_keys
        .generate_signed_pre_key(&mut OsRng, 1)
        .expect("fresh store");

    let alice_identity = IdentityKeyPair::generate(&mut OsRng);
    let mut alice = Session::new(
        ratchet_session::Aes256GcmBackend,
        SessionConfig::default(),
    )
    .expect("default config is valid");
    let handshake = alice
        .initiate(&mut OsRng, &alice_identity, &bob_keys.bundle().expect("bundle"))
        .expect("handshake");
    let mut bob = Session::new(
        ratchet_session::Aes256GcmBackend,
        SessionConfig::default(),
    )
    .expect("default config is valid");
    bob.accept(&bob_keys, &handshake).expect("accept");

    let envelope = alice.encrypt(plaintext).expect("encryption should succeed");
    let mut wire = envelope.to_bytes();
    let index = position % wire.len();
    wire[index] ^= flip;

    if flip != 0 {
        if let Ok(corrupted) = Envelope::from_bytes(&wire) {
            assert!(bob.decrypt(&corrupted).is_err());
        }
    }

    // The genuine message still decrypts afterwards
    let decrypted = bob.decrypt(&envelope).expect("decryption should succeed");
    assert_eq!(decrypted, plaintext);
});
