//! Pairwise encrypted session.
//!
//! A [`Session`] ties one X3DH handshake to one Double Ratchet and to the
//! backend it was created with. Lifecycle:
//!
//! ```text
//! Uninitialized --initiate--> Active
//! Uninitialized --accept----> AwaitingFirstMessage --first decrypt--> Active
//! ```
//!
//! # Snapshot format
//!
//! ```text
//! "DRS1" || format version (1) || backend kind (1) || bincode payload || SHA-256 (32)
//! ```
//!
//! The digest covers every preceding byte. Blobs hold live key material and
//! must be stored encrypted at rest by the caller.

use crate::backend::{ensure_kind, Aes256GcmBackend, BackendInfo, BackendKind, CryptoBackend};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::keys::IdentityKeyPair;
use crate::message::Envelope;
use crate::prekey::{PreKeyBundle, PreKeyManager};
use crate::ratchet::{RatchetSnapshot, RatchetState};
use crate::storage::PreKeyStore;
use crate::x3dh::{self, HandshakeEnvelope};
use rand_core::{CryptoRngCore, OsRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Leading bytes of every session snapshot.
pub const SNAPSHOT_MAGIC: &[u8; 4] = b"DRS1";

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u8 = 1;

const DIGEST_SIZE: usize = 32;
const PREFIX_SIZE: usize = SNAPSHOT_MAGIC.len() + 2;
const MAX_PAYLOAD: usize = 1 << 24;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No handshake yet
    Uninitialized,
    /// Responder finished X3DH and waits for the initiator's first message
    AwaitingFirstMessage,
    /// Both directions usable
    Active,
}

#[derive(Serialize, Deserialize)]
struct SessionSnapshot {
    state: SessionState,
    ratchet: Option<RatchetSnapshot>,
}

/// End-to-end encrypted session with one peer.
///
/// Operations need `&mut self`; wrap the session in [`SharedSession`] to use
/// it from several threads.
///
/// # Example
/// ```
/// use ratchet_session::{
///     Aes256GcmBackend, IdentityKeyPair, PreKeyConfig, PreKeyManager, Session, SessionConfig,
/// };
/// use rand_core::OsRng;
///
/// let mut bob_keys =
///     PreKeyManager::new(IdentityKeyPair::generate(&mut OsRng), PreKeyConfig::default())?;
/// bob_keys.generate_signed_pre_key(&mut OsRng, 1)?;
/// bob_keys.generate_pre_key_batch(&mut OsRng, 10)?;
///
/// let alice_identity = IdentityKeyPair::generate(&mut OsRng);
/// let mut alice = Session::new(Aes256GcmBackend, SessionConfig::default())?;
/// let handshake = alice.initiate(&mut OsRng, &alice_identity, &bob_keys.bundle()?)?;
///
/// let mut bob = Session::new(Aes256GcmBackend, SessionConfig::default())?;
/// bob.accept(&bob_keys, &handshake)?;
///
/// let envelope = alice.encrypt(b"hello")?;
/// assert_eq!(bob.decrypt(&envelope)?, b"hello");
/// # Ok::<(), ratchet_session::Error>(())
/// ```
pub struct Session<B: CryptoBackend = Aes256GcmBackend> {
    backend: B,
    config: SessionConfig,
    state: SessionState,
    ratchet: Option<RatchetState>,
}

impl<B: CryptoBackend> Session<B> {
    /// Creates an uninitialized session bound to `backend`.
    ///
    /// # Errors
    /// `Error::InvalidConfig` if `config` does not validate.
    pub fn new(backend: B, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            config,
            state: SessionState::Uninitialized,
            ratchet: None,
        })
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Identity of the backend this session is bound to.
    #[must_use]
    pub fn backend_info(&self) -> BackendInfo {
        self.backend.info()
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// `IK_initiator || IK_responder` once the handshake is done.
    #[must_use]
    pub fn associated_data(&self) -> Option<&[u8]> {
        self.ratchet.as_ref().map(RatchetState::associated_data)
    }

    /// Number of cached keys for messages not yet received.
    #[must_use]
    pub fn skipped_key_count(&self) -> usize {
        self.ratchet
            .as_ref()
            .map_or(0, RatchetState::skipped_key_count)
    }

    /// Runs X3DH against `bundle` and moves to `Active`.
    ///
    /// Returns the handshake envelope to deliver to the responder along with
    /// (or ahead of) the first message.
    ///
    /// # Errors
    /// - `Error::InvalidSessionState` unless the session is `Uninitialized`
    /// - `Error::IdentityVerificationFailure` for a badly signed bundle
    pub fn initiate<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
        identity: &IdentityKeyPair,
        bundle: &PreKeyBundle,
    ) -> Result<HandshakeEnvelope> {
        self.expect_state(SessionState::Uninitialized)?;

        let result = x3dh::initiate(&self.backend, rng, identity, bundle)?;
        let ratchet = RatchetState::init_initiator(
            &self.backend,
            rng,
            &result.shared_secret,
            result.associated_data,
            result.remote_ratchet_key,
            self.config,
        )?;

        self.ratchet = Some(ratchet);
        self.state = SessionState::Active;
        Ok(result.envelope)
    }

    /// Completes X3DH as responder and moves to `AwaitingFirstMessage`.
    ///
    /// # Errors
    /// - `Error::InvalidSessionState` unless the session is `Uninitialized`
    /// - any error of [`x3dh::respond`]
    pub fn accept<S: PreKeyStore>(
        &mut self,
        manager: &PreKeyManager<S>,
        envelope: &HandshakeEnvelope,
    ) -> Result<()> {
        self.expect_state(SessionState::Uninitialized)?;

        let result = x3dh::respond(&self.backend, manager, envelope)?;
        let ratchet = RatchetState::init_responder(
            result.shared_secret,
            result.associated_data,
            result.ratchet_key_pair,
            self.config,
        );

        self.ratchet = Some(ratchet);
        self.state = SessionState::AwaitingFirstMessage;
        Ok(())
    }

    /// Encrypts a message for the peer.
    ///
    /// # Errors
    /// `Error::InvalidSessionState` before the session is `Active`.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Envelope> {
        self.expect_state(SessionState::Active)?;
        let ratchet = self.ratchet.as_mut().ok_or(Error::InvalidSessionState)?;
        ratchet.encrypt(&self.backend, plaintext)
    }

    /// Decrypts a message from the peer, using the OS RNG for ratchet keys.
    pub fn decrypt(&mut self, envelope: &Envelope) -> Result<Vec<u8>> {
        self.decrypt_with_rng(&mut OsRng, envelope)
    }

    /// Decrypts a message from the peer.
    ///
    /// All-or-nothing: on any error the session is left exactly as it was.
    ///
    /// # Errors
    /// - `Error::AuthenticationFailure` for a forged or tampered message
    /// - `Error::SkipWindowExceeded` when too many messages were skipped
    /// - `Error::MessageUnrecoverable` for a replayed or expired message
    pub fn decrypt_with_rng<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
        envelope: &Envelope,
    ) -> Result<Vec<u8>> {
        if self.state == SessionState::Uninitialized {
            return Err(Error::InvalidSessionState);
        }
        let ratchet = self.ratchet.as_mut().ok_or(Error::InvalidSessionState)?;
        let plaintext = ratchet.decrypt(&self.backend, rng, envelope)?;

        if self.state == SessionState::AwaitingFirstMessage {
            tracing::debug!("first message received, session active");
            self.state = SessionState::Active;
        }
        Ok(plaintext)
    }

    /// Serializes the full session into an opaque snapshot.
    pub fn serialize(&self) -> Result<Zeroizing<Vec<u8>>> {
        let snapshot = SessionSnapshot {
            state: self.state,
            ratchet: self.ratchet.as_ref().map(RatchetState::to_snapshot),
        };
        let payload = Zeroizing::new(bincode::serde::encode_to_vec(
            &snapshot,
            bincode::config::standard(),
        )?);

        let mut blob = Zeroizing::new(Vec::with_capacity(
            PREFIX_SIZE + payload.len() + DIGEST_SIZE,
        ));
        blob.extend_from_slice(SNAPSHOT_MAGIC);
        blob.push(SNAPSHOT_VERSION);
        blob.push(self.backend.info().kind.to_u8());
        blob.extend_from_slice(&payload);
        let digest = Sha256::digest(blob.as_slice());
        blob.extend_from_slice(&digest);
        Ok(blob)
    }

    /// Restores a session from a snapshot.
    ///
    /// # Errors
    /// - `Error::SessionCorrupted` for a truncated, tampered, unknown-version
    ///   or inconsistent snapshot
    /// - `Error::BackendMismatch` if the snapshot was made under another backend
    pub fn restore(backend: B, config: SessionConfig, bytes: &[u8]) -> Result<Self> {
        config.validate()?;
        let kind = parse_prefix(bytes).map_err(|err| {
            tracing::warn!(len = bytes.len(), "rejected session snapshot");
            err
        })?;
        ensure_kind(backend.info().kind, kind)?;

        let payload = &bytes[PREFIX_SIZE..bytes.len() - DIGEST_SIZE];
        let (snapshot, read): (SessionSnapshot, usize) = bincode::serde::decode_from_slice(
            payload,
            bincode::config::standard().with_limit::<MAX_PAYLOAD>(),
        )?;
        if read != payload.len() {
            return Err(Error::SessionCorrupted);
        }

        let ratchet = match (&snapshot.state, &snapshot.ratchet) {
            (SessionState::Uninitialized, None) => None,
            (SessionState::AwaitingFirstMessage, Some(ratchet))
                if !ratchet.has_sending_chain() && !ratchet.has_remote_ratchet() =>
            {
                Some(RatchetState::from_snapshot(ratchet, config)?)
            }
            (SessionState::Active, Some(ratchet))
                if ratchet.has_sending_chain() && ratchet.has_remote_ratchet() =>
            {
                Some(RatchetState::from_snapshot(ratchet, config)?)
            }
            _ => return Err(Error::SessionCorrupted),
        };

        tracing::debug!(state = ?snapshot.state, "restored session");
        Ok(Self {
            backend,
            config,
            state: snapshot.state,
            ratchet,
        })
    }

    fn expect_state(&self, expected: SessionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidSessionState)
        }
    }
}

impl<B: CryptoBackend> std::fmt::Debug for Session<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.backend.info().name)
            .field("state", &self.state)
            .field("ratchet", &self.ratchet)
            .finish_non_exhaustive()
    }
}

/// Checks magic, version and digest; returns the recorded backend.
fn parse_prefix(bytes: &[u8]) -> Result<BackendKind> {
    if bytes.len() < PREFIX_SIZE + DIGEST_SIZE {
        return Err(Error::SessionCorrupted);
    }
    let (body, digest) = bytes.split_at(bytes.len() - DIGEST_SIZE);
    if !bool::from(Sha256::digest(body).as_slice().ct_eq(digest)) {
        return Err(Error::SessionCorrupted);
    }
    if &body[..SNAPSHOT_MAGIC.len()] != SNAPSHOT_MAGIC || body[4] != SNAPSHOT_VERSION {
        return Err(Error::SessionCorrupted);
    }
    BackendKind::from_u8(body[5]).ok_or(Error::SessionCorrupted)
}

/// Session shared between threads.
///
/// Every operation holds the lock for its whole duration, so sends and
/// receives on one session are serialized.
pub struct SharedSession<B: CryptoBackend = Aes256GcmBackend> {
    inner: Arc<Mutex<Session<B>>>,
}

impl<B: CryptoBackend> Clone for SharedSession<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: CryptoBackend> SharedSession<B> {
    #[must_use]
    pub fn new(session: Session<B>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Envelope> {
        self.with(|session| session.encrypt(plaintext))
    }

    pub fn decrypt(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        self.with(|session| session.decrypt(envelope))
    }

    pub fn state(&self) -> Result<SessionState> {
        self.with(|session| Ok(session.state()))
    }

    pub fn serialize(&self) -> Result<Zeroizing<Vec<u8>>> {
        self.with(|session| session.serialize())
    }

    /// Runs `f` with exclusive access to the session.
    ///
    /// # Errors
    /// `Error::StorageError` if a previous holder panicked.
    pub fn with<T>(&self, f: impl FnOnce(&mut Session<B>) -> Result<T>) -> Result<T> {
        let mut session = self.inner.lock().map_err(|_| Error::StorageError)?;
        f(&mut session)
    }
}

impl<B: CryptoBackend> From<Session<B>> for SharedSession<B> {
    fn from(session: Session<B>) -> Self {
        Self::new(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ChaCha20Poly1305Backend;
    use crate::config::PreKeyConfig;

    fn handshake<B: CryptoBackend + Copy>(backend: B) -> (Session<B>, Session<B>) {
        let mut bob_keys =
            PreKeyManager::new(IdentityKeyPair::generate(&mut OsRng), PreKeyConfig::default())
                .unwrap();
        bob_keys.generate_signed_pre_key(&mut OsRng, 1).unwrap();
        bob_keys.generate_pre_key_batch(&mut OsRng, 2).unwrap();

        let alice_identity = IdentityKeyPair::generate(&mut OsRng);
        let mut alice = Session::new(backend, SessionConfig::default()).unwrap();
        let envelope = alice
            .initiate(&mut OsRng, &alice_identity, &bob_keys.bundle().unwrap())
            .unwrap();

        let mut bob = Session::new(backend, SessionConfig::default()).unwrap();
        bob.accept(&bob_keys, &envelope).unwrap();
        (alice, bob)
    }

    #[test]
    fn test_state_transitions() {
        let (mut alice, mut bob) = handshake(Aes256GcmBackend);
        assert_eq!(alice.state(), SessionState::Active);
        assert_eq!(bob.state(), SessionState::AwaitingFirstMessage);
        assert!(matches!(bob.encrypt(b"early"), Err(Error::InvalidSessionState)));

        let msg = alice.encrypt(b"hi").unwrap();
        bob.decrypt(&msg).unwrap();
        assert_eq!(bob.state(), SessionState::Active);
        assert!(bob.encrypt(b"now").is_ok());
    }

    #[test]
    fn test_uninitialized_rejects_messages() {
        let (mut alice, _) = handshake(Aes256GcmBackend);
        let msg = alice.encrypt(b"hi").unwrap();

        let mut fresh = Session::new(Aes256GcmBackend, SessionConfig::default()).unwrap();
        assert!(matches!(fresh.encrypt(b"x"), Err(Error::InvalidSessionState)));
        assert!(matches!(fresh.decrypt(&msg), Err(Error::InvalidSessionState)));
    }

    #[test]
    fn test_failed_decrypt_leaves_state_unchanged() {
        let (mut alice, mut bob) = handshake(Aes256GcmBackend);
        let msg = alice.encrypt(b"payload").unwrap();

        let mut forged = msg.clone();
        forged.tag[0] ^= 0xFF;
        assert!(matches!(bob.decrypt(&forged), Err(Error::AuthenticationFailure)));
        assert_eq!(bob.state(), SessionState::AwaitingFirstMessage);

        assert_eq!(bob.decrypt(&msg).unwrap(), b"payload");
    }

    #[test]
    fn test_tampered_header_rejected() {
        let (mut alice, mut bob) = handshake(Aes256GcmBackend);
        alice.encrypt(b"zero").unwrap();
        let mut msg = alice.encrypt(b"one").unwrap();
        msg.header.message_index = 0;

        assert!(matches!(bob.decrypt(&msg), Err(Error::AuthenticationFailure)));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let (mut alice, mut bob) = handshake(ChaCha20Poly1305Backend);
        let m0 = alice.encrypt(b"zero").unwrap();
        let m1 = alice.encrypt(b"one").unwrap();
        bob.decrypt(&m1).unwrap();

        let blob = bob.serialize().unwrap();
        assert_eq!(&blob[..4], SNAPSHOT_MAGIC);

        let mut restored =
            Session::restore(ChaCha20Poly1305Backend, SessionConfig::default(), &blob).unwrap();
        assert_eq!(restored.state(), SessionState::Active);
        assert_eq!(restored.decrypt(&m0).unwrap(), b"zero");

        let reply = restored.encrypt(b"back").unwrap();
        assert_eq!(alice.decrypt(&reply).unwrap(), b"back");
    }

    #[test]
    fn test_restore_rejects_corruption() {
        let (_, bob) = handshake(Aes256GcmBackend);
        let blob = bob.serialize().unwrap();
        let config = SessionConfig::default();

        let truncated = &blob[..blob.len() - 1];
        assert!(matches!(
            Session::restore(Aes256GcmBackend, config, truncated),
            Err(Error::SessionCorrupted)
        ));

        let mut flipped = blob.to_vec();
        flipped[10] ^= 0x01;
        assert!(matches!(
            Session::restore(Aes256GcmBackend, config, &flipped),
            Err(Error::SessionCorrupted)
        ));

        assert!(matches!(
            Session::restore(Aes256GcmBackend, config, &[]),
            Err(Error::SessionCorrupted)
        ));
    }

    #[test]
    fn test_restore_rejects_unknown_version() {
        let (_, bob) = handshake(Aes256GcmBackend);
        let mut blob = bob.serialize().unwrap().to_vec();
        blob[4] = 2;
        let body_len = blob.len() - DIGEST_SIZE;
        let digest = Sha256::digest(&blob[..body_len]);
        blob[body_len..].copy_from_slice(&digest);

        assert!(matches!(
            Session::restore(Aes256GcmBackend, SessionConfig::default(), &blob),
            Err(Error::SessionCorrupted)
        ));
    }

    #[test]
    fn test_restore_rejects_other_backend() {
        let (_, bob) = handshake(Aes256GcmBackend);
        let blob = bob.serialize().unwrap();

        let result = Session::restore(ChaCha20Poly1305Backend, SessionConfig::default(), &blob);
        assert!(matches!(
            result,
            Err(Error::BackendMismatch {
                expected: BackendKind::ChaCha20Poly1305,
                found: BackendKind::Aes256Gcm,
            })
        ));
    }

    #[test]
    fn test_uninitialized_snapshot() {
        let session = Session::new(Aes256GcmBackend, SessionConfig::default()).unwrap();
        let blob = session.serialize().unwrap();
        let restored =
            Session::restore(Aes256GcmBackend, SessionConfig::default(), &blob).unwrap();
        assert_eq!(restored.state(), SessionState::Uninitialized);
    }

    #[test]
    fn test_shared_session_across_threads() {
        let (alice, mut bob) = handshake(Aes256GcmBackend);
        let alice = SharedSession::new(alice);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let alice = alice.clone();
                std::thread::spawn(move || alice.encrypt(b"concurrent").unwrap())
            })
            .collect();
        let envelopes: Vec<Envelope> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let mut indices: Vec<u32> = envelopes.iter().map(|e| e.header.message_index).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2, 3]);

        for envelope in &envelopes {
            assert_eq!(bob.decrypt(envelope).unwrap(), b"concurrent");
        }
    }
}
