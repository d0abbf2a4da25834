//! Key derivation for the X3DH secret and both ratchets.
//!
//! All derivations are HKDF-SHA-256 or HMAC-SHA-256 with distinct
//! domain-separation labels, so no output of one call site can be confused
//! with another.

use crate::error::{Error, Result};
use crate::keys::{DhOutput, SymmetricKey, KEY_SIZE};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

/// Info label for the X3DH shared secret.
pub const X3DH_INFO: &[u8] = b"RatchetSession_X3DH_v1";

/// Info label for the root (DH ratchet) step.
pub const ROOT_INFO: &[u8] = b"RatchetSession_Root_v1";

/// HMAC input deriving a message key from a chain key.
const MESSAGE_KEY_SEED: u8 = 0x01;

/// HMAC input deriving the next chain key.
const CHAIN_KEY_SEED: u8 = 0x02;

/// Upper bound on HKDF-SHA-256 output (255 blocks of 32 bytes).
pub const MAX_OUTPUT_LEN: usize = 255 * 32;

type HmacSha256 = Hmac<Sha256>;

/// Generic HKDF-SHA-256: extract with `salt`, expand with `info`.
///
/// # Errors
/// `Error::CryptoError` if `output_len` is zero or above [`MAX_OUTPUT_LEN`].
pub fn derive_key(
    input_key_material: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output_len: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    if output_len == 0 || output_len > MAX_OUTPUT_LEN {
        return Err(Error::CryptoError);
    }

    let hkdf = Hkdf::<Sha256>::new(salt, input_key_material);
    let mut output = Zeroizing::new(vec![0u8; output_len]);
    hkdf.expand(info, &mut output)
        .map_err(|_| Error::CryptoError)?;
    Ok(output)
}

/// X3DH key derivation.
///
/// `SK = HKDF(salt = 0^32, ikm = 0xFF^32 || DH1 || DH2 || DH3 [|| DH4], info = X3DH_INFO)`
///
/// The leading `0xFF` block separates the input from any XEdDSA use of the
/// same curve keys.
pub fn derive_x3dh_secret(
    dh1: &DhOutput,
    dh2: &DhOutput,
    dh3: &DhOutput,
    dh4: Option<&DhOutput>,
) -> Result<SymmetricKey> {
    x3dh_secret_with(derive_key, dh1, dh2, dh3, dh4)
}

/// Root KDF for a DH ratchet step.
///
/// Computes `(RK', CK) = HKDF(salt = RK, ikm = DH_out, info = ROOT_INFO)`.
/// The old root key is replaced by the caller, never reused.
pub fn kdf_root(
    root_key: &SymmetricKey,
    dh_output: &DhOutput,
) -> Result<(SymmetricKey, SymmetricKey)> {
    root_step_with(derive_key, root_key, dh_output)
}

/// [`derive_x3dh_secret`] over any HKDF implementation.
pub(crate) fn x3dh_secret_with<F>(
    derive: F,
    dh1: &DhOutput,
    dh2: &DhOutput,
    dh3: &DhOutput,
    dh4: Option<&DhOutput>,
) -> Result<SymmetricKey>
where
    F: FnOnce(&[u8], Option<&[u8]>, &[u8], usize) -> Result<Zeroizing<Vec<u8>>>,
{
    let mut ikm = Zeroizing::new(Vec::with_capacity(KEY_SIZE * 5));
    ikm.extend_from_slice(&[0xFF; KEY_SIZE]);
    for dh in [Some(dh1), Some(dh2), Some(dh3), dh4].into_iter().flatten() {
        ikm.extend_from_slice(dh.as_bytes());
    }

    let salt = [0u8; KEY_SIZE];
    let output = derive(&ikm, Some(&salt), X3DH_INFO, KEY_SIZE)?;
    SymmetricKey::from_slice(&output)
}

/// [`kdf_root`] over any HKDF implementation.
pub(crate) fn root_step_with<F>(
    derive: F,
    root_key: &SymmetricKey,
    dh_output: &DhOutput,
) -> Result<(SymmetricKey, SymmetricKey)>
where
    F: FnOnce(&[u8], Option<&[u8]>, &[u8], usize) -> Result<Zeroizing<Vec<u8>>>,
{
    let output = derive(
        dh_output.as_bytes(),
        Some(root_key.as_bytes()),
        ROOT_INFO,
        KEY_SIZE * 2,
    )?;

    let new_root = SymmetricKey::from_slice(&output[..KEY_SIZE])?;
    let new_chain = SymmetricKey::from_slice(&output[KEY_SIZE..])?;
    Ok((new_root, new_chain))
}

/// Chain KDF for a symmetric ratchet step.
///
/// `MK = HMAC(CK, 0x01)`, `CK' = HMAC(CK, 0x02)`. Returns `(CK', MK)`.
/// HMAC is one-way, so neither output reveals `CK` or the other output.
pub fn kdf_chain(chain_key: &SymmetricKey) -> Result<(SymmetricKey, SymmetricKey)> {
    let message_key = hmac_step(chain_key, MESSAGE_KEY_SEED)?;
    let next_chain = hmac_step(chain_key, CHAIN_KEY_SEED)?;
    Ok((next_chain, message_key))
}

fn hmac_step(chain_key: &SymmetricKey, seed: u8) -> Result<SymmetricKey> {
    let mut mac =
        HmacSha256::new_from_slice(chain_key.as_bytes()).map_err(|_| Error::CryptoError)?;
    mac.update(&[seed]);
    let mut bytes: [u8; KEY_SIZE] = mac.finalize().into_bytes().into();
    let key = SymmetricKey::from_bytes(bytes);
    bytes.zeroize();
    Ok(key)
}

/// HMAC-SHA-256 of `label` under `key`, truncated to `N` bytes.
pub(crate) fn hmac_label<const N: usize>(key: &[u8], label: &[u8]) -> Result<[u8; N]> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| Error::CryptoError)?;
    mac.update(label);
    let digest = mac.finalize().into_bytes();
    digest
        .get(..N)
        .and_then(|b| b.try_into().ok())
        .ok_or(Error::CryptoError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_x3dh_matches_manual_hkdf() {
        let dh1 = DhOutput([1u8; 32]);
        let dh2 = DhOutput([2u8; 32]);
        let dh3 = DhOutput([3u8; 32]);

        let sk = derive_x3dh_secret(&dh1, &dh2, &dh3, None).unwrap();

        let mut ikm = vec![0xFF; 32];
        ikm.extend_from_slice(&[1u8; 32]);
        ikm.extend_from_slice(&[2u8; 32]);
        ikm.extend_from_slice(&[3u8; 32]);
        let hkdf = Hkdf::<Sha256>::new(Some(&[0u8; 32]), &ikm);
        let mut expected = [0u8; 32];
        hkdf.expand(X3DH_INFO, &mut expected).unwrap();

        assert_eq!(sk.as_bytes(), &expected);
    }

    #[test]
    fn test_x3dh_one_time_key_changes_secret() {
        let dh1 = DhOutput([1u8; 32]);
        let dh2 = DhOutput([2u8; 32]);
        let dh3 = DhOutput([3u8; 32]);
        let dh4 = DhOutput([4u8; 32]);

        let three = derive_x3dh_secret(&dh1, &dh2, &dh3, None).unwrap();
        let four = derive_x3dh_secret(&dh1, &dh2, &dh3, Some(&dh4)).unwrap();

        assert_ne!(three.as_bytes(), four.as_bytes());
    }

    #[test]
    fn test_kdf_chain_outputs_are_distinct() {
        let ck = SymmetricKey::from_bytes([42u8; 32]);
        let (next, mk) = kdf_chain(&ck).unwrap();

        assert_ne!(next.as_bytes(), mk.as_bytes());
        assert_ne!(next.as_bytes(), ck.as_bytes());
        assert_ne!(mk.as_bytes(), ck.as_bytes());
    }

    #[test]
    fn test_kdf_chain_deterministic() {
        let ck = SymmetricKey::from_bytes([7u8; 32]);
        let (c1, m1) = kdf_chain(&ck).unwrap();
        let (c2, m2) = kdf_chain(&ck).unwrap();

        assert_eq!(c1.as_bytes(), c2.as_bytes());
        assert_eq!(m1.as_bytes(), m2.as_bytes());
    }

    #[test]
    fn test_kdf_root_replaces_root() {
        let rk = SymmetricKey::from_bytes([5u8; 32]);
        let dh = DhOutput([6u8; 32]);
        let (new_root, chain) = kdf_root(&rk, &dh).unwrap();

        assert_ne!(new_root.as_bytes(), rk.as_bytes());
        assert_ne!(new_root.as_bytes(), chain.as_bytes());
    }

    #[test]
    fn test_derive_key_length_bounds() {
        assert!(derive_key(b"ikm", None, b"info", 0).is_err());
        assert!(derive_key(b"ikm", None, b"info", MAX_OUTPUT_LEN + 1).is_err());
        assert_eq!(derive_key(b"ikm", None, b"info", 80).unwrap().len(), 80);
    }
}
