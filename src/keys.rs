//! Key types with automatic zeroization.

use crate::error::{Error, Result};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of every key handled by this crate, in bytes.
pub const KEY_SIZE: usize = 32;

/// X25519 public key.
///
/// Contains no secret information; safe to log, compare and transmit.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    /// Size in bytes
    pub const SIZE: usize = KEY_SIZE;

    /// Creates a public key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Creates a public key from a slice, rejecting anything but 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| Error::InvalidPublicKey)?;
        Ok(Self(bytes))
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    fn to_x25519(self) -> X25519PublicKey {
        X25519PublicKey::from(self.0)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // short fingerprint
        write!(
            f,
            "PublicKey({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

impl From<&StaticSecret> for PublicKey {
    fn from(secret: &StaticSecret) -> Self {
        Self(*X25519PublicKey::from(secret).as_bytes())
    }
}

/// X25519 secret key, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(StaticSecret);

impl SecretKey {
    /// Generates a new random secret key.
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        Self(StaticSecret::random_from_rng(rng))
    }

    /// Creates a secret key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Derives the matching public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(&self.0)
    }

    /// Performs X25519 Diffie-Hellman.
    ///
    /// The output must go through a KDF before being used as a key.
    #[must_use]
    pub fn diffie_hellman(&self, public: &PublicKey) -> DhOutput {
        let shared = self.0.diffie_hellman(&public.to_x25519());
        DhOutput(*shared.as_bytes())
    }

    /// Raw scalar bytes, for XEdDSA conversion and session snapshots only.
    pub(crate) fn expose_bytes(&self) -> &[u8; KEY_SIZE] {
        self.0.as_bytes()
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// Raw Diffie-Hellman output, zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DhOutput(pub(crate) [u8; KEY_SIZE]);

impl DhOutput {
    /// Returns the raw shared secret bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// False when the peer key had low order and forced an all-zero output.
    #[must_use]
    pub fn is_contributory(&self) -> bool {
        !bool::from(self.0.ct_eq(&[0u8; KEY_SIZE]))
    }
}

impl std::fmt::Debug for DhOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DhOutput([REDACTED])")
    }
}

/// 256-bit symmetric key (root, chain or message key), zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Creates a symmetric key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Creates a symmetric key from the first 32 bytes of a slice.
    pub(crate) fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_SIZE] = bytes
            .get(..KEY_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(Error::CryptoError)?;
        Ok(Self(bytes))
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

/// Long-term identity key pair.
///
/// A single X25519 key serves both Diffie-Hellman (X3DH) and signing (XEdDSA),
/// so only one public key has to be published and verified.
#[derive(Clone, Debug)]
pub struct IdentityKeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl IdentityKeyPair {
    /// Generates a new identity key pair.
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        let secret = SecretKey::generate(rng);
        let public = secret.public_key();
        tracing::debug!(identity = ?public, "generated identity key pair");
        Self { secret, public }
    }

    /// Rebuilds an identity from its secret key, e.g. after loading it from an
    /// external key store.
    #[must_use]
    pub fn from_secret(secret: SecretKey) -> Self {
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Returns the public identity key.
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Returns the secret identity key.
    #[must_use]
    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }
}

/// Generates a fresh identity key pair.
///
/// Pure generation; persisting and publishing the key is up to the caller.
pub fn generate_identity_key_pair<R: CryptoRngCore>(rng: &mut R) -> IdentityKeyPair {
    IdentityKeyPair::generate(rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn test_diffie_hellman() {
        let alice = SecretKey::generate(&mut OsRng);
        let bob = SecretKey::generate(&mut OsRng);

        let shared1 = alice.diffie_hellman(&bob.public_key());
        let shared2 = bob.diffie_hellman(&alice.public_key());

        assert_eq!(shared1.as_bytes(), shared2.as_bytes());
    }

    #[test]
    fn test_low_order_point_is_not_contributory() {
        let secret = SecretKey::generate(&mut OsRng);
        let zero = secret.diffie_hellman(&PublicKey::from_bytes([0u8; 32]));
        assert!(!zero.is_contributory());

        let peer = SecretKey::generate(&mut OsRng).public_key();
        assert!(secret.diffie_hellman(&peer).is_contributory());
    }

    #[test]
    fn test_identity_from_secret() {
        let identity = generate_identity_key_pair(&mut OsRng);
        let rebuilt = IdentityKeyPair::from_secret(identity.secret_key().clone());
        assert_eq!(identity.public_key(), rebuilt.public_key());
    }

    #[test]
    fn test_public_key_from_slice() {
        assert!(PublicKey::from_slice(&[7u8; 32]).is_ok());
        assert_eq!(
            PublicKey::from_slice(&[7u8; 31]),
            Err(Error::InvalidPublicKey)
        );
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let secret = SecretKey::generate(&mut OsRng);
        assert_eq!(format!("{secret:?}"), "SecretKey([REDACTED])");

        let key = SymmetricKey::from_bytes([9u8; KEY_SIZE]);
        assert!(!format!("{key:?}").contains('9'));
    }
}
