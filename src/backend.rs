//! Pluggable cryptographic backends.
//!
//! Sessions and handshakes depend only on [`CryptoBackend`]. The set of
//! backends is closed and each one is tagged with a [`BackendKind`] that is
//! written into session snapshots, so a session is bound to the backend it was
//! created with.

use crate::aead::{self, Sealed, IV_SIZE, TAG_SIZE};
use crate::error::{Error, Result};
use crate::kdf;
use crate::keys::{DhOutput, SymmetricKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Tag identifying a backend implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BackendKind {
    /// AES-256-GCM with HKDF/HMAC-SHA-256 (reference backend)
    Aes256Gcm = 1,
    /// ChaCha20-Poly1305 with HKDF/HMAC-SHA-256
    ChaCha20Poly1305 = 2,
}

impl BackendKind {
    /// Wire tag of this backend.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parses a wire tag; `None` for unknown tags.
    #[must_use]
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Aes256Gcm),
            2 => Some(Self::ChaCha20Poly1305),
            _ => None,
        }
    }
}

/// Identity of a backend, for logs and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendInfo {
    pub kind: BackendKind,
    pub name: &'static str,
    pub version: &'static str,
}

/// AEAD + KDF primitives consumed by the handshake and the ratchet.
///
/// Implementors provide sealing, opening and raw HKDF. Root, chain and X3DH
/// derivations have default implementations built on those and on HMAC-SHA-256;
/// they are part of the trait so a backend can replace them wholesale.
pub trait CryptoBackend: Send + Sync {
    /// Describes this backend.
    fn info(&self) -> BackendInfo;

    /// Encrypts `plaintext` under a single-use key.
    fn seal(&self, key: &SymmetricKey, plaintext: &[u8], associated_data: &[u8])
        -> Result<Sealed>;

    /// Decrypts and authenticates.
    ///
    /// # Errors
    /// `Error::AuthenticationFailure` when the tag does not verify.
    fn open(
        &self,
        key: &SymmetricKey,
        ciphertext: &[u8],
        iv: &[u8; IV_SIZE],
        tag: &[u8; TAG_SIZE],
        associated_data: &[u8],
    ) -> Result<Vec<u8>>;

    /// HKDF extract-and-expand.
    fn derive_key(
        &self,
        input_key_material: &[u8],
        salt: Option<&[u8]>,
        info: &[u8],
        output_len: usize,
    ) -> Result<Zeroizing<Vec<u8>>>;

    /// Root step: `(RK', CK)` from the current root key and a DH output.
    fn kdf_root(
        &self,
        root_key: &SymmetricKey,
        dh_output: &DhOutput,
    ) -> Result<(SymmetricKey, SymmetricKey)> {
        kdf::root_step_with(
            |ikm, salt, info, len| self.derive_key(ikm, salt, info, len),
            root_key,
            dh_output,
        )
    }

    /// Chain step: `(CK', MK)`.
    fn kdf_chain(&self, chain_key: &SymmetricKey) -> Result<(SymmetricKey, SymmetricKey)> {
        kdf::kdf_chain(chain_key)
    }

    /// X3DH shared secret from three or four DH outputs.
    fn derive_x3dh_secret(
        &self,
        dh1: &DhOutput,
        dh2: &DhOutput,
        dh3: &DhOutput,
        dh4: Option<&DhOutput>,
    ) -> Result<SymmetricKey> {
        kdf::x3dh_secret_with(
            |ikm, salt, info, len| self.derive_key(ikm, salt, info, len),
            dh1,
            dh2,
            dh3,
            dh4,
        )
    }
}

/// Reference backend: AES-256-GCM and HKDF-SHA-256.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aes256GcmBackend;

impl CryptoBackend for Aes256GcmBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            kind: BackendKind::Aes256Gcm,
            name: "aes-256-gcm/hkdf-sha256",
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    fn seal(
        &self,
        key: &SymmetricKey,
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> Result<Sealed> {
        aead::encrypt(key, plaintext, associated_data)
    }

    fn open(
        &self,
        key: &SymmetricKey,
        ciphertext: &[u8],
        iv: &[u8; IV_SIZE],
        tag: &[u8; TAG_SIZE],
        associated_data: &[u8],
    ) -> Result<Vec<u8>> {
        aead::decrypt(key, ciphertext, iv, tag, associated_data)
    }

    fn derive_key(
        &self,
        input_key_material: &[u8],
        salt: Option<&[u8]>,
        info: &[u8],
        output_len: usize,
    ) -> Result<Zeroizing<Vec<u8>>> {
        kdf::derive_key(input_key_material, salt, info, output_len)
    }
}

/// Alternative backend: ChaCha20-Poly1305 and HKDF-SHA-256.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChaCha20Poly1305Backend;

impl CryptoBackend for ChaCha20Poly1305Backend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            kind: BackendKind::ChaCha20Poly1305,
            name: "chacha20-poly1305/hkdf-sha256",
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    fn seal(
        &self,
        key: &SymmetricKey,
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> Result<Sealed> {
        aead::encrypt_chacha20(key, plaintext, associated_data)
    }

    fn open(
        &self,
        key: &SymmetricKey,
        ciphertext: &[u8],
        iv: &[u8; IV_SIZE],
        tag: &[u8; TAG_SIZE],
        associated_data: &[u8],
    ) -> Result<Vec<u8>> {
        aead::decrypt_chacha20(key, ciphertext, iv, tag, associated_data)
    }

    fn derive_key(
        &self,
        input_key_material: &[u8],
        salt: Option<&[u8]>,
        info: &[u8],
        output_len: usize,
    ) -> Result<Zeroizing<Vec<u8>>> {
        kdf::derive_key(input_key_material, salt, info, output_len)
    }
}

impl<B: CryptoBackend + ?Sized> CryptoBackend for &B {
    fn info(&self) -> BackendInfo {
        (**self).info()
    }

    fn seal(
        &self,
        key: &SymmetricKey,
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> Result<Sealed> {
        (**self).seal(key, plaintext, associated_data)
    }

    fn open(
        &self,
        key: &SymmetricKey,
        ciphertext: &[u8],
        iv: &[u8; IV_SIZE],
        tag: &[u8; TAG_SIZE],
        associated_data: &[u8],
    ) -> Result<Vec<u8>> {
        (**self).open(key, ciphertext, iv, tag, associated_data)
    }

    fn derive_key(
        &self,
        input_key_material: &[u8],
        salt: Option<&[u8]>,
        info: &[u8],
        output_len: usize,
    ) -> Result<Zeroizing<Vec<u8>>> {
        (**self).derive_key(input_key_material, salt, info, output_len)
    }

    fn kdf_root(
        &self,
        root_key: &SymmetricKey,
        dh_output: &DhOutput,
    ) -> Result<(SymmetricKey, SymmetricKey)> {
        (**self).kdf_root(root_key, dh_output)
    }

    fn kdf_chain(&self, chain_key: &SymmetricKey) -> Result<(SymmetricKey, SymmetricKey)> {
        (**self).kdf_chain(chain_key)
    }

    fn derive_x3dh_secret(
        &self,
        dh1: &DhOutput,
        dh2: &DhOutput,
        dh3: &DhOutput,
        dh4: Option<&DhOutput>,
    ) -> Result<SymmetricKey> {
        (**self).derive_x3dh_secret(dh1, dh2, dh3, dh4)
    }
}

/// Rejects a snapshot recorded under another backend.
pub(crate) fn ensure_kind(expected: BackendKind, found: BackendKind) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(Error::BackendMismatch { expected, found })
    }
}
