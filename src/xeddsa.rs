//! XEdDSA signatures over X25519 identity keys.
//!
//! Lets the identity key that takes part in X3DH also sign the signed
//! pre-key, following "The XEdDSA and VXEdDSA Signature Schemes"
//! (Perrin, revision 1).

use crate::error::{Error, Result};
use crate::keys::{PublicKey, SecretKey};
use curve25519_dalek::{
    constants::ED25519_BASEPOINT_TABLE,
    edwards::{CompressedEdwardsY, EdwardsPoint},
    montgomery::MontgomeryPoint,
    scalar::Scalar,
};
use rand_core::CryptoRngCore;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Signature length in bytes: `R (32) || s (32)`.
pub const SIGNATURE_LENGTH: usize = 64;

/// XEdDSA signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_LENGTH]);

impl Signature {
    /// Creates a signature from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; SIGNATURE_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the raw signature bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LENGTH] {
        self.0
    }

    /// Mutable access to the raw bytes.
    pub fn as_bytes_mut(&mut self) -> &mut [u8; SIGNATURE_LENGTH] {
        &mut self.0
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Edwards signing scalar derived from an X25519 secret.
#[derive(Zeroize, ZeroizeOnDrop)]
struct SigningScalar {
    a: Scalar,
    #[zeroize(skip)]
    public: CompressedEdwardsY,
}

impl SigningScalar {
    fn from_secret(secret: &SecretKey) -> Self {
        let mut k = *secret.expose_bytes();
        k[0] &= 248;
        k[31] &= 127;
        k[31] |= 64;

        let k_scalar = Scalar::from_bytes_mod_order(k);
        k.zeroize();

        // A = kB with the sign bit forced to zero; negate k if needed.
        let e = (&k_scalar * ED25519_BASEPOINT_TABLE).compress();
        let negative = e.as_bytes()[31] >> 7 == 1;
        let a = if negative { -k_scalar } else { k_scalar };

        let mut public = e.to_bytes();
        public[31] &= 0x7F;

        Self {
            a,
            public: CompressedEdwardsY(public),
        }
    }
}

/// Signs `message` with an X25519 identity secret.
pub fn sign<R: CryptoRngCore>(rng: &mut R, secret: &SecretKey, message: &[u8]) -> Signature {
    let mut random = [0u8; 64];
    rng.fill_bytes(&mut random);
    let signature = sign_with_nonce(secret, message, &random);
    random.zeroize();
    signature
}

/// Deterministic core of [`sign`], taking the 64 random bytes `Z` explicitly.
#[must_use]
pub fn sign_with_nonce(secret: &SecretKey, message: &[u8], random: &[u8; 64]) -> Signature {
    let key = SigningScalar::from_secret(secret);

    // r = hash1(a || M || Z)
    let mut hasher = Sha512::new();
    hasher.update([0xFE]);
    hasher.update([0xFF; 31]);
    hasher.update(key.a.as_bytes());
    hasher.update(message);
    hasher.update(random);
    let r = Scalar::from_bytes_mod_order_wide(&hasher.finalize().into());

    let big_r = (&r * ED25519_BASEPOINT_TABLE).compress();
    let h = challenge(&big_r, &key.public, message);
    let s = r + h * key.a;

    let mut out = [0u8; SIGNATURE_LENGTH];
    out[..32].copy_from_slice(big_r.as_bytes());
    out[32..].copy_from_slice(s.as_bytes());
    Signature(out)
}

/// Verifies an XEdDSA signature against an X25519 public key.
///
/// # Errors
/// `Error::IdentityVerificationFailure` for any malformed or non-matching
/// signature, `Error::InvalidPublicKey` if the key has no Edwards form.
pub fn verify(public: &PublicKey, message: &[u8], signature: &Signature) -> Result<()> {
    let a_compressed = edwards_from_montgomery(public)?;
    let a_point = a_compressed.decompress().ok_or(Error::InvalidPublicKey)?;
    if !a_point.is_torsion_free() {
        return Err(Error::InvalidPublicKey);
    }

    let mut r_bytes = [0u8; 32];
    let mut s_bytes = [0u8; 32];
    r_bytes.copy_from_slice(&signature.0[..32]);
    s_bytes.copy_from_slice(&signature.0[32..]);

    // s must be below 2^253
    if s_bytes[31] & 0xE0 != 0 {
        return Err(Error::IdentityVerificationFailure);
    }
    let big_r = CompressedEdwardsY(r_bytes);
    if big_r.decompress().is_none() {
        return Err(Error::IdentityVerificationFailure);
    }

    let s = Scalar::from_bytes_mod_order(s_bytes);
    let h = challenge(&big_r, &a_compressed, message);

    // R' = sB - hA
    let r_check = EdwardsPoint::vartime_double_scalar_mul_basepoint(&h, &-a_point, &s);

    if r_check.compress().as_bytes().ct_eq(&r_bytes).into() {
        Ok(())
    } else {
        Err(Error::IdentityVerificationFailure)
    }
}

fn edwards_from_montgomery(public: &PublicKey) -> Result<CompressedEdwardsY> {
    let mut u = *public.as_bytes();
    u[31] &= 0x7F;

    let edwards = MontgomeryPoint(u).to_edwards(0).ok_or(Error::InvalidPublicKey)?;
    let mut bytes = edwards.compress().to_bytes();
    bytes[31] &= 0x7F;
    Ok(CompressedEdwardsY(bytes))
}

/// `h = hash(R || A || M) mod q`
fn challenge(r: &CompressedEdwardsY, a: &CompressedEdwardsY, message: &[u8]) -> Scalar {
    let mut hasher = Sha512::new();
    hasher.update(r.as_bytes());
    hasher.update(a.as_bytes());
    hasher.update(message);
    Scalar::from_bytes_mod_order_wide(&hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn test_sign_verify() {
        let secret = SecretKey::generate(&mut OsRng);
        let signature = sign(&mut OsRng, &secret, b"pre-key material");

        verify(&secret.public_key(), b"pre-key material", &signature).unwrap();
    }

    #[test]
    fn test_wrong_message_rejected() {
        let secret = SecretKey::generate(&mut OsRng);
        let signature = sign(&mut OsRng, &secret, b"original");

        assert_eq!(
            verify(&secret.public_key(), b"altered", &signature),
            Err(Error::IdentityVerificationFailure)
        );
    }

    #[test]
    fn test_wrong_key_rejected() {
        let secret = SecretKey::generate(&mut OsRng);
        let other = SecretKey::generate(&mut OsRng);
        let signature = sign(&mut OsRng, &secret, b"msg");

        assert!(verify(&other.public_key(), b"msg", &signature).is_err());
    }

    #[test]
    fn test_signatures_are_randomized() {
        let secret = SecretKey::generate(&mut OsRng);
        let sig1 = sign_with_nonce(&secret, b"msg", &[1u8; 64]);
        let sig2 = sign_with_nonce(&secret, b"msg", &[2u8; 64]);

        assert_ne!(sig1, sig2);
        verify(&secret.public_key(), b"msg", &sig1).unwrap();
        verify(&secret.public_key(), b"msg", &sig2).unwrap();
    }

    #[test]
    fn test_oversized_s_rejected() {
        let secret = SecretKey::generate(&mut OsRng);
        let mut signature = sign(&mut OsRng, &secret, b"msg");
        signature.as_bytes_mut()[63] |= 0xE0;

        assert!(verify(&secret.public_key(), b"msg", &signature).is_err());
    }
}
