//! Authenticated encryption with detached tags.
//!
//! Every key handed to this module is a single-use message key, so the IV is
//! derived from the key itself: it is unique for the key's whole lifetime by
//! construction.

use crate::error::{Error, Result};
use crate::kdf::hmac_label;
use crate::keys::SymmetricKey;
use aes_gcm::aead::{
    consts::{U12, U16},
    generic_array::GenericArray,
    AeadCore, AeadInPlace, KeyInit,
};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;
use zeroize::Zeroize;

/// IV (nonce) length in bytes.
pub const IV_SIZE: usize = 12;

/// Authentication tag length in bytes.
pub const TAG_SIZE: usize = 16;

const IV_LABEL: &[u8] = b"RatchetSession_AEAD_IV";

/// Output of an AEAD encryption: ciphertext with its IV and detached tag.
#[derive(Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_SIZE],
    pub tag: [u8; TAG_SIZE],
}

impl std::fmt::Debug for Sealed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sealed")
            .field("ciphertext_len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}

/// Derives the IV bound to a single-use key.
pub fn derive_iv(key: &SymmetricKey) -> Result<[u8; IV_SIZE]> {
    hmac_label::<IV_SIZE>(key.as_bytes(), IV_LABEL)
}

/// AES-256-GCM encryption.
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8], associated_data: &[u8]) -> Result<Sealed> {
    seal::<Aes256Gcm>(key, plaintext, associated_data)
}

/// AES-256-GCM decryption.
///
/// # Errors
/// `Error::AuthenticationFailure` on any tag mismatch. No plaintext is ever
/// returned for a failed tag.
pub fn decrypt(
    key: &SymmetricKey,
    ciphertext: &[u8],
    iv: &[u8; IV_SIZE],
    tag: &[u8; TAG_SIZE],
    associated_data: &[u8],
) -> Result<Vec<u8>> {
    open::<Aes256Gcm>(key, ciphertext, iv, tag, associated_data)
}

/// ChaCha20-Poly1305 with the same contract as [`encrypt`].
pub fn encrypt_chacha20(
    key: &SymmetricKey,
    plaintext: &[u8],
    associated_data: &[u8],
) -> Result<Sealed> {
    seal::<ChaCha20Poly1305>(key, plaintext, associated_data)
}

/// ChaCha20-Poly1305 with the same contract as [`decrypt`].
pub fn decrypt_chacha20(
    key: &SymmetricKey,
    ciphertext: &[u8],
    iv: &[u8; IV_SIZE],
    tag: &[u8; TAG_SIZE],
    associated_data: &[u8],
) -> Result<Vec<u8>> {
    open::<ChaCha20Poly1305>(key, ciphertext, iv, tag, associated_data)
}

fn seal<C>(key: &SymmetricKey, plaintext: &[u8], associated_data: &[u8]) -> Result<Sealed>
where
    C: KeyInit + AeadInPlace + AeadCore<NonceSize = U12, TagSize = U16>,
{
    let cipher = C::new_from_slice(key.as_bytes()).map_err(|_| Error::CryptoError)?;
    let iv = derive_iv(key)?;

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(&iv), associated_data, &mut buffer)
        .map_err(|_| Error::CryptoError)?;

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(&tag);

    Ok(Sealed {
        ciphertext: buffer,
        iv,
        tag: tag_bytes,
    })
}

fn open<C>(
    key: &SymmetricKey,
    ciphertext: &[u8],
    iv: &[u8; IV_SIZE],
    tag: &[u8; TAG_SIZE],
    associated_data: &[u8],
) -> Result<Vec<u8>>
where
    C: KeyInit + AeadInPlace + AeadCore<NonceSize = U12, TagSize = U16>,
{
    let cipher = C::new_from_slice(key.as_bytes()).map_err(|_| Error::CryptoError)?;

    let mut buffer = ciphertext.to_vec();
    let outcome = cipher.decrypt_in_place_detached(
        GenericArray::from_slice(iv),
        associated_data,
        &mut buffer,
        GenericArray::from_slice(tag),
    );

    match outcome {
        Ok(()) => Ok(buffer),
        Err(_) => {
            buffer.zeroize();
            Err(Error::AuthenticationFailure)
        }
    }
}
