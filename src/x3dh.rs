//! X3DH (Extended Triple Diffie-Hellman) key agreement.
//!
//! Follows <https://signal.org/docs/specifications/x3dh/> with a single
//! X25519 identity key that also signs the signed pre-key (XEdDSA).
//!
//! ## Protocol Flow
//!
//! 1. **Responder (Bob)** publishes a [`PreKeyBundle`]: identity key, signed
//!    pre-key with its signature, and optionally a one-time pre-key.
//!
//! 2. **Initiator (Alice)** verifies the signature, generates an ephemeral key
//!    `EK_A` and computes:
//!    - DH1 = `DH(IK_A, SPK_B)`
//!    - DH2 = `DH(EK_A, IK_B)`
//!    - DH3 = `DH(EK_A, SPK_B)`
//!    - DH4 = `DH(EK_A, OPK_B)` [if the bundle carried an OPK]
//!    - SK = KDF(DH1 || DH2 || DH3 || DH4)
//!
//! 3. **Responder** receives the [`HandshakeEnvelope`], recomputes the same
//!    values from its private keys and deletes the referenced OPK.
//!
//! Both sides bind the session to `IK_A || IK_B` as associated data.

use crate::backend::CryptoBackend;
use crate::error::{Error, Result};
use crate::keys::{DhOutput, IdentityKeyPair, PublicKey, SecretKey, SymmetricKey, KEY_SIZE};
use crate::message::Reader;
use crate::prekey::{PreKeyBundle, PreKeyManager};
use crate::storage::PreKeyStore;
use rand_core::CryptoRngCore;

/// Version byte leading an encoded handshake envelope.
pub const HANDSHAKE_VERSION: u8 = 1;

/// First message from the initiator to the responder.
///
/// Wire layout:
///
/// ```text
/// version (1) || identity (32) || ephemeral (32) || spk_id (4 LE)
///             || flag (1) [|| opk_id (4 LE)]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeEnvelope {
    /// Initiator's identity public key
    pub identity_key: PublicKey,
    /// Initiator's ephemeral public key
    pub ephemeral_key: PublicKey,
    /// Responder's signed pre-key the initiator used
    pub signed_pre_key_id: u32,
    /// Responder's one-time pre-key the initiator used, if any
    pub one_time_pre_key_id: Option<u32>,
}

impl HandshakeEnvelope {
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + KEY_SIZE * 2 + 4 + 1 + 4);
        bytes.push(HANDSHAKE_VERSION);
        bytes.extend_from_slice(self.identity_key.as_bytes());
        bytes.extend_from_slice(self.ephemeral_key.as_bytes());
        bytes.extend_from_slice(&self.signed_pre_key_id.to_le_bytes());
        match self.one_time_pre_key_id {
            Some(id) => {
                bytes.push(1);
                bytes.extend_from_slice(&id.to_le_bytes());
            }
            None => bytes.push(0),
        }
        bytes
    }

    /// # Errors
    /// `Error::InvalidMessageFormat` for a wrong length, version or flag.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        if reader.u8()? != HANDSHAKE_VERSION {
            return Err(Error::InvalidMessageFormat);
        }
        let identity_key = reader.public_key()?;
        let ephemeral_key = reader.public_key()?;
        let signed_pre_key_id = reader.u32_le()?;
        let one_time_pre_key_id = if reader.flag()? {
            Some(reader.u32_le()?)
        } else {
            None
        };
        reader.finish()?;

        Ok(Self {
            identity_key,
            ephemeral_key,
            signed_pre_key_id,
            one_time_pre_key_id,
        })
    }
}

/// Result of X3DH initiation.
#[derive(Debug)]
pub struct InitiatorResult {
    /// Shared secret, the initial root key
    pub shared_secret: SymmetricKey,
    /// Associated data `IK_A || IK_B`
    pub associated_data: Vec<u8>,
    /// Envelope to deliver to the responder
    pub envelope: HandshakeEnvelope,
    /// Responder's signed pre-key, its first ratchet public key
    pub remote_ratchet_key: PublicKey,
}

/// Result of X3DH response.
#[derive(Debug)]
pub struct ResponderResult {
    pub shared_secret: SymmetricKey,
    pub associated_data: Vec<u8>,
    /// Signed pre-key pair, reused as the responder's first ratchet key pair
    pub ratchet_key_pair: SecretKey,
    /// Initiator's identity key
    pub remote_identity: PublicKey,
}

fn associated_data(initiator: &PublicKey, responder: &PublicKey) -> Vec<u8> {
    let mut ad = Vec::with_capacity(KEY_SIZE * 2);
    ad.extend_from_slice(initiator.as_bytes());
    ad.extend_from_slice(responder.as_bytes());
    ad
}

fn contributory(dh: DhOutput) -> Result<DhOutput> {
    if dh.is_contributory() {
        Ok(dh)
    } else {
        Err(Error::InvalidPublicKey)
    }
}

/// Initiates X3DH key agreement against a fetched bundle.
///
/// Performs 3 or 4 Diffie-Hellman operations depending on whether the bundle
/// carries a one-time pre-key. The ephemeral private key and every DH output
/// are zeroized before this function returns.
///
/// # Arguments
/// * `backend` - Backend performing the key derivation
/// * `rng` - Cryptographically secure RNG
/// * `identity` - Initiator's identity key pair
/// * `bundle` - Responder's pre-key bundle
///
/// # Errors
/// `Error::IdentityVerificationFailure` if the bundle's signature is invalid.
pub fn initiate<B, R>(
    backend: &B,
    rng: &mut R,
    identity: &IdentityKeyPair,
    bundle: &PreKeyBundle,
) -> Result<InitiatorResult>
where
    B: CryptoBackend + ?Sized,
    R: CryptoRngCore,
{
    bundle.verify_signature()?;

    let ephemeral = SecretKey::generate(rng);
    let ephemeral_key = ephemeral.public_key();

    // DH1 = DH(IK_A, SPK_B)
    let dh1 = contributory(identity.secret_key().diffie_hellman(&bundle.signed_pre_key))?;
    // DH2 = DH(EK_A, IK_B)
    let dh2 = contributory(ephemeral.diffie_hellman(&bundle.identity_key))?;
    // DH3 = DH(EK_A, SPK_B)
    let dh3 = contributory(ephemeral.diffie_hellman(&bundle.signed_pre_key))?;
    // DH4 = DH(EK_A, OPK_B)
    let dh4 = bundle
        .one_time_pre_key
        .map(|(_, opk)| contributory(ephemeral.diffie_hellman(&opk)))
        .transpose()?;
    drop(ephemeral);

    let shared_secret = backend.derive_x3dh_secret(&dh1, &dh2, &dh3, dh4.as_ref())?;

    let envelope = HandshakeEnvelope {
        identity_key: *identity.public_key(),
        ephemeral_key,
        signed_pre_key_id: bundle.signed_pre_key_id,
        one_time_pre_key_id: bundle.one_time_pre_key.map(|(id, _)| id),
    };

    tracing::debug!(
        remote = ?bundle.identity_key,
        one_time_pre_key = ?envelope.one_time_pre_key_id,
        "x3dh initiated"
    );

    Ok(InitiatorResult {
        shared_secret,
        associated_data: associated_data(identity.public_key(), &bundle.identity_key),
        envelope,
        remote_ratchet_key: bundle.signed_pre_key,
    })
}

/// Completes X3DH on the responder side.
///
/// Verifies the referenced signed pre-key against the responder's identity,
/// recomputes the DH values and consumes the referenced one-time pre-key.
///
/// # Errors
/// - `Error::UnknownSignedPreKey` if the signed pre-key is gone
/// - `Error::IdentityVerificationFailure` if its signature does not verify
/// - `Error::OneTimeKeyExhausted` if the one-time pre-key was already used
pub fn respond<B, S>(
    backend: &B,
    manager: &PreKeyManager<S>,
    envelope: &HandshakeEnvelope,
) -> Result<ResponderResult>
where
    B: CryptoBackend + ?Sized,
    S: PreKeyStore,
{
    let identity = manager.identity();
    let signed = manager.signed_pre_key(envelope.signed_pre_key_id)?;
    signed.verify(identity.public_key()).map_err(|_| {
        tracing::warn!(id = envelope.signed_pre_key_id, "stored signed pre-key fails verification");
        Error::IdentityVerificationFailure
    })?;

    // DH1 = DH(SPK_B, IK_A)
    let dh1 = contributory(signed.secret_key().diffie_hellman(&envelope.identity_key))?;
    // DH2 = DH(IK_B, EK_A)
    let dh2 = contributory(identity.secret_key().diffie_hellman(&envelope.ephemeral_key))?;
    // DH3 = DH(SPK_B, EK_A)
    let dh3 = contributory(signed.secret_key().diffie_hellman(&envelope.ephemeral_key))?;
    // DH4 = DH(OPK_B, EK_A)
    let dh4 = match envelope.one_time_pre_key_id {
        Some(id) => {
            let opk = manager.consume_one_time_pre_key(id).map_err(|err| {
                tracing::warn!(id, "handshake references unavailable one-time pre-key");
                err
            })?;
            Some(opk.secret_key().diffie_hellman(&envelope.ephemeral_key))
        }
        None => None,
    };

    let shared_secret = backend.derive_x3dh_secret(&dh1, &dh2, &dh3, dh4.as_ref())?;

    tracing::debug!(
        remote = ?envelope.identity_key,
        one_time_pre_key = ?envelope.one_time_pre_key_id,
        "x3dh completed"
    );

    Ok(ResponderResult {
        shared_secret,
        associated_data: associated_data(&envelope.identity_key, identity.public_key()),
        ratchet_key_pair: signed.secret_key().clone(),
        remote_identity: envelope.identity_key,
    })
}
