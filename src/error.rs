//! Error types for the session layer.

use crate::backend::BackendKind;
use thiserror::Error;

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during handshake, ratchet and persistence operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Signed pre-key signature does not verify against the claimed identity.
    ///
    /// The handshake aborts. Retrying requires a freshly fetched bundle.
    #[error("signed pre-key signature does not match identity key")]
    IdentityVerificationFailure,

    /// AEAD tag mismatch: wrong key, tampered ciphertext or tampered header.
    ///
    /// The message is dropped and the session state is left untouched.
    #[error("message authentication failed")]
    AuthenticationFailure,

    /// Gap between the expected and the received message index exceeds the
    /// configured skip window.
    #[error("message gap exceeds skip window")]
    SkipWindowExceeded,

    /// Duplicate or expired message index; its key no longer exists.
    ///
    /// Replays are recognised as long as their epoch is among the last
    /// `SessionConfig::max_retired_epochs` ratchet keys. Older replays fail
    /// as [`Error::AuthenticationFailure`] instead; either way nothing
    /// changes.
    #[error("message key already consumed or expired")]
    MessageUnrecoverable,

    /// Session blob is truncated, tampered with, or of an unknown version.
    #[error("session state is corrupted")]
    SessionCorrupted,

    /// The referenced one-time pre-key does not exist (consumed or never
    /// issued), or none is left while building a bundle under a policy that
    /// requires one.
    #[error("one-time pre-key exhausted")]
    OneTimeKeyExhausted,

    /// Pre-key batch size is zero or above the configured limit.
    #[error("invalid pre-key batch size")]
    InvalidPreKeyCount,

    /// No unused pre-key id is left below `u32::MAX`.
    #[error("pre-key ids exhausted")]
    PreKeyIdsExhausted,

    /// A pre-key with this id already exists in the store.
    #[error("pre-key id {0} already in use")]
    PreKeyIdCollision(u32),

    /// The handshake references a signed pre-key that is not (or no longer)
    /// held by the store.
    #[error("unknown signed pre-key {0}")]
    UnknownSignedPreKey(u32),

    /// Public key bytes do not decode to a usable curve point.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Operation not allowed in the session's current state.
    #[error("invalid session state")]
    InvalidSessionState,

    /// A chain counter reached its maximum value.
    #[error("message counter exhausted")]
    ChainExhausted,

    /// Wire bytes are truncated or malformed.
    #[error("invalid message format")]
    InvalidMessageFormat,

    /// Session blob was produced by a different cryptographic backend.
    #[error("backend mismatch: session uses {found:?}, restoring with {expected:?}")]
    BackendMismatch {
        /// Backend doing the restore
        expected: BackendKind,
        /// Backend recorded in the blob
        found: BackendKind,
    },

    /// Storage backend failure (e.g. poisoned lock).
    #[error("storage error")]
    StorageError,

    /// Internal cryptographic failure; should not occur with valid inputs.
    #[error("cryptographic error")]
    CryptoError,

    /// Configuration values are out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

impl Error {
    /// Returns `true` when the error invalidates the session instance.
    ///
    /// Per-message failures (authentication, window, replay) leave the session
    /// usable; the caller decides whether to re-handshake on fatal ones.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::SessionCorrupted
                | Error::BackendMismatch { .. }
                | Error::IdentityVerificationFailure
                | Error::ChainExhausted
        )
    }
}

impl From<bincode::error::EncodeError> for Error {
    fn from(_: bincode::error::EncodeError) -> Self {
        Error::CryptoError
    }
}

impl From<bincode::error::DecodeError> for Error {
    fn from(_: bincode::error::DecodeError) -> Self {
        Error::SessionCorrupted
    }
}
