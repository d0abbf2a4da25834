//! End-to-end encrypted pairwise sessions: X3DH key agreement followed by the
//! Double Ratchet, over a pluggable cryptographic backend.
//!
//! # Security Properties
//!
//! ## Forward Secrecy
//! Every message is encrypted under its own key, derived one-way from a chain
//! key and erased after use. Later keys never reveal earlier ones.
//!
//! ## Post-Compromise Security
//! Each change of sending direction performs a fresh Diffie-Hellman exchange,
//! so a leaked session state stops being useful after one round trip.
//!
//! ## Asynchronous Operation
//! The initiator only needs the responder's published [`PreKeyBundle`]. One-time
//! pre-keys are consumed atomically; bundles without one are accepted as a
//! weaker mode.
//!
//! ## Out-of-order Delivery
//! Keys for skipped messages are cached in a bounded window. Replays and
//! messages older than the window fail with [`Error::MessageUnrecoverable`]
//! and never change session state.
//!
//! # Threat Model
//!
//! **Assumed adversary capabilities:**
//! - Active network attacker (inject, modify, replay, delay, drop messages)
//! - Compromise of a session snapshot or of a device at some point in time
//!
//! **Security assumptions:**
//! - X25519 ECDH provides computational security
//! - HKDF-SHA256 and HMAC-SHA256 are secure PRFs
//! - AES-256-GCM and ChaCha20-Poly1305 are secure AEAD ciphers
//! - The caller's RNG is cryptographically secure
//! - Identity keys are verified out of band
//!
//! # Protocol Flow
//!
//! ```rust
//! use ratchet_session::{
//!     Aes256GcmBackend, Envelope, HandshakeEnvelope, IdentityKeyPair, PreKeyBundle,
//!     PreKeyConfig, PreKeyManager, Session, SessionConfig,
//! };
//! use rand_core::OsRng;
//!
//! // 1. Bob provisions keys and publishes a bundle
//! let mut bob_keys =
//!     PreKeyManager::new(IdentityKeyPair::generate(&mut OsRng), PreKeyConfig::default())?;
//! bob_keys.generate_signed_pre_key(&mut OsRng, 1)?;
//! bob_keys.generate_pre_key_batch(&mut OsRng, 100)?;
//! let published = bob_keys.bundle()?.to_bytes();
//!
//! // 2. Alice fetches the bundle and starts a session
//! let alice_identity = IdentityKeyPair::generate(&mut OsRng);
//! let mut alice = Session::new(Aes256GcmBackend, SessionConfig::default())?;
//! let handshake = alice.initiate(&mut OsRng, &alice_identity, &PreKeyBundle::from_bytes(&published)?)?;
//! let first = alice.encrypt(b"Hello Bob!")?;
//!
//! // 3. Bob accepts the handshake and reads the first message
//! let mut bob = Session::new(Aes256GcmBackend, SessionConfig::default())?;
//! bob.accept(&bob_keys, &HandshakeEnvelope::from_bytes(&handshake.to_bytes())?)?;
//! let plaintext = bob.decrypt(&Envelope::from_bytes(&first.to_bytes())?)?;
//! assert_eq!(plaintext, b"Hello Bob!");
//!
//! // 4. Either side may now send
//! let reply = bob.encrypt(b"Hello Alice!")?;
//! assert_eq!(alice.decrypt(&reply)?, b"Hello Alice!");
//! # Ok::<(), ratchet_session::Error>(())
//! ```
//!
//! # Logging
//!
//! Events are emitted through [`tracing`]; the crate never installs a
//! subscriber and never logs key material.
//!
//! # Modules
//!
//! - [`x3dh`]: Extended Triple Diffie-Hellman key agreement
//! - [`session`]: Double Ratchet sessions and snapshots
//! - [`prekey`]: Signed and one-time pre-keys, bundles, rotation
//! - [`storage`]: Pre-key storage seam
//! - [`backend`]: Pluggable AEAD/KDF backends
//! - [`aead`], [`kdf`]: Symmetric primitives
//! - [`keys`], [`xeddsa`]: Curve25519 keys and signatures
//! - [`message`]: Envelope wire format
//! - [`config`], [`error`]: Tunables and error types

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unreachable_pub)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![warn(clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    missing_docs,
    clippy::missing_errors_doc,
    clippy::missing_fields_in_debug,
    clippy::module_name_repetitions
)]

pub mod aead;
pub mod backend;
pub mod config;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod message;
pub mod prekey;
mod ratchet;
pub mod session;
pub mod storage;
pub mod x3dh;
pub mod xeddsa;

// Re-export main types
pub use backend::{
    Aes256GcmBackend, BackendInfo, BackendKind, ChaCha20Poly1305Backend, CryptoBackend,
};
pub use config::{PreKeyConfig, SessionConfig};
pub use error::{Error, Result};
pub use keys::{generate_identity_key_pair, IdentityKeyPair, PublicKey, SecretKey};
pub use message::{Envelope, Header};
pub use prekey::{PreKeyBundle, PreKeyManager};
pub use session::{Session, SessionState, SharedSession};
pub use storage::{InMemoryPreKeyStore, PreKeyStore};
pub use x3dh::HandshakeEnvelope;
