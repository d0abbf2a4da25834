//! Signed and one-time pre-keys, published bundles, and their lifecycle.
//!
//! A party publishes a [`PreKeyBundle`] so others can start a session while it
//! is offline. [`PreKeyManager`] owns the identity key and drives generation,
//! signed pre-key rotation and pruning against a [`PreKeyStore`].

use crate::config::PreKeyConfig;
use crate::error::{Error, Result};
use crate::keys::{IdentityKeyPair, PublicKey, SecretKey, KEY_SIZE};
use crate::message::Reader;
use crate::storage::{InMemoryPreKeyStore, PreKeyStore};
use crate::xeddsa::{self, Signature, SIGNATURE_LENGTH};
use rand_core::CryptoRngCore;
use std::time::{Duration, SystemTime};

/// Version byte leading an encoded bundle.
pub const BUNDLE_VERSION: u8 = 1;

const BUNDLE_BASE_LEN: usize = 1 + KEY_SIZE + 4 + KEY_SIZE + SIGNATURE_LENGTH + 1;
const BUNDLE_OPK_LEN: usize = 4 + KEY_SIZE;

/// Message covered by a signed pre-key signature: `IK || SPK`.
fn signed_message(identity: &PublicKey, signed_pre_key: &PublicKey) -> [u8; KEY_SIZE * 2] {
    let mut message = [0u8; KEY_SIZE * 2];
    message[..KEY_SIZE].copy_from_slice(identity.as_bytes());
    message[KEY_SIZE..].copy_from_slice(signed_pre_key.as_bytes());
    message
}

/// Medium-term pre-key signed by the identity key.
#[derive(Clone)]
pub struct SignedPreKey {
    id: u32,
    secret: SecretKey,
    public: PublicKey,
    signature: Signature,
    created_at: SystemTime,
}

impl SignedPreKey {
    /// Generates a key pair and signs `identity || public` with the identity key.
    pub fn generate<R: CryptoRngCore>(
        rng: &mut R,
        identity: &IdentityKeyPair,
        id: u32,
        created_at: SystemTime,
    ) -> Self {
        let secret = SecretKey::generate(rng);
        let public = secret.public_key();
        let message = signed_message(identity.public_key(), &public);
        let signature = xeddsa::sign(rng, identity.secret_key(), &message);

        Self {
            id,
            secret,
            public,
            signature,
            created_at,
        }
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    #[must_use]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    #[must_use]
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Verifies the signature against an identity key.
    pub fn verify(&self, identity: &PublicKey) -> Result<()> {
        xeddsa::verify(
            identity,
            &signed_message(identity, &self.public),
            &self.signature,
        )
    }

    pub(crate) fn secret_key(&self) -> &SecretKey {
        &self.secret
    }
}

impl std::fmt::Debug for SignedPreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedPreKey")
            .field("id", &self.id)
            .field("public", &self.public)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Single-use pre-key.
pub struct OneTimePreKey {
    id: u32,
    secret: SecretKey,
    public: PublicKey,
}

impl OneTimePreKey {
    pub fn generate<R: CryptoRngCore>(rng: &mut R, id: u32) -> Self {
        let secret = SecretKey::generate(rng);
        let public = secret.public_key();
        Self { id, secret, public }
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub(crate) fn secret_key(&self) -> &SecretKey {
        &self.secret
    }
}

impl std::fmt::Debug for OneTimePreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneTimePreKey")
            .field("id", &self.id)
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Pre-key bundle published by a party for others to initiate sessions.
///
/// Wire layout:
///
/// ```text
/// version (1) || identity (32) || spk_id (4 LE) || spk (32) || signature (64)
///             || flag (1) [|| opk_id (4 LE) || opk (32)]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreKeyBundle {
    /// Long-term identity key
    pub identity_key: PublicKey,
    pub signed_pre_key_id: u32,
    pub signed_pre_key: PublicKey,
    /// XEdDSA signature over `identity_key || signed_pre_key`
    pub signature: Signature,
    /// One-time pre-key id and public key, if any are left
    pub one_time_pre_key: Option<(u32, PublicKey)>,
}

impl PreKeyBundle {
    /// Verifies that the signed pre-key was signed by `identity_key`.
    ///
    /// # Errors
    /// `Error::IdentityVerificationFailure` when the signature does not match.
    pub fn verify_signature(&self) -> Result<()> {
        xeddsa::verify(
            &self.identity_key,
            &signed_message(&self.identity_key, &self.signed_pre_key),
            &self.signature,
        )
        .map_err(|err| {
            tracing::warn!(identity = ?self.identity_key, "pre-key bundle signature rejected");
            match err {
                Error::InvalidPublicKey => Error::IdentityVerificationFailure,
                other => other,
            }
        })
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(BUNDLE_BASE_LEN + BUNDLE_OPK_LEN);
        bytes.push(BUNDLE_VERSION);
        bytes.extend_from_slice(self.identity_key.as_bytes());
        bytes.extend_from_slice(&self.signed_pre_key_id.to_le_bytes());
        bytes.extend_from_slice(self.signed_pre_key.as_bytes());
        bytes.extend_from_slice(&self.signature.to_bytes());
        match &self.one_time_pre_key {
            Some((id, key)) => {
                bytes.push(1);
                bytes.extend_from_slice(&id.to_le_bytes());
                bytes.extend_from_slice(key.as_bytes());
            }
            None => bytes.push(0),
        }
        bytes
    }

    /// Parses a bundle. The signature is not checked here.
    ///
    /// # Errors
    /// `Error::InvalidMessageFormat` for a wrong length, version or flag.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        if reader.u8()? != BUNDLE_VERSION {
            return Err(Error::InvalidMessageFormat);
        }
        let identity_key = reader.public_key()?;
        let signed_pre_key_id = reader.u32_le()?;
        let signed_pre_key = reader.public_key()?;
        let signature = Signature::from_bytes(reader.array::<SIGNATURE_LENGTH>()?);
        let one_time_pre_key = if reader.flag()? {
            Some((reader.u32_le()?, reader.public_key()?))
        } else {
            None
        };
        reader.finish()?;

        Ok(Self {
            identity_key,
            signed_pre_key_id,
            signed_pre_key,
            signature,
            one_time_pre_key,
        })
    }
}

/// Owns a party's identity and manages its pre-keys.
pub struct PreKeyManager<S: PreKeyStore = InMemoryPreKeyStore> {
    identity: IdentityKeyPair,
    store: S,
    config: PreKeyConfig,
    /// `None` once the id space is used up
    next_one_time_id: Option<u32>,
    active_signed_pre_key: Option<u32>,
}

impl PreKeyManager<InMemoryPreKeyStore> {
    /// Creates a manager over a fresh in-memory store.
    pub fn new(identity: IdentityKeyPair, config: PreKeyConfig) -> Result<Self> {
        Self::with_store(identity, InMemoryPreKeyStore::new(), config)
    }
}

impl<S: PreKeyStore> PreKeyManager<S> {
    /// Creates a manager over an existing store.
    ///
    /// One-time ids continue after the highest id the store ever held, so
    /// consumed ids are not reused. The newest stored signed pre-key becomes
    /// the active one.
    pub fn with_store(identity: IdentityKeyPair, store: S, config: PreKeyConfig) -> Result<Self> {
        config.validate()?;

        let last_one_time_id = store
            .last_one_time_pre_key_id()?
            .max(store.list_one_time_pre_keys()?.last().copied());
        let next_one_time_id = last_one_time_id.map_or(Some(1), |id| id.checked_add(1));
        let active_signed_pre_key = store.list_signed_pre_keys()?.last().map(|&(id, _)| id);

        Ok(Self {
            identity,
            store,
            config,
            next_one_time_id,
            active_signed_pre_key,
        })
    }

    #[must_use]
    pub fn identity(&self) -> &IdentityKeyPair {
        &self.identity
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &PreKeyConfig {
        &self.config
    }

    /// Id of the signed pre-key currently placed in bundles.
    #[must_use]
    pub fn active_signed_pre_key_id(&self) -> Option<u32> {
        self.active_signed_pre_key
    }

    /// Generates `count` one-time pre-keys with sequential ids and stores them.
    ///
    /// Returns the public halves for publishing. Nothing is stored when any id
    /// of the batch is already taken.
    ///
    /// # Errors
    /// - `Error::InvalidPreKeyCount` if `count` is zero or above the batch limit
    /// - `Error::PreKeyIdCollision` if an id in the batch is already stored
    /// - `Error::PreKeyIdsExhausted` if the batch would run past `u32::MAX`
    pub fn generate_pre_key_batch<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
        count: u32,
    ) -> Result<Vec<(u32, PublicKey)>> {
        if count == 0 || count > self.config.batch_limit {
            return Err(Error::InvalidPreKeyCount);
        }

        let first = self.next_one_time_id.ok_or(Error::PreKeyIdsExhausted)?;
        let last = first
            .checked_add(count - 1)
            .ok_or(Error::PreKeyIdsExhausted)?;
        let ids: Vec<u32> = (first..=last).collect();

        let existing = self.store.list_one_time_pre_keys()?;
        if let Some(&taken) = ids.iter().find(|id| existing.binary_search(id).is_ok()) {
            return Err(Error::PreKeyIdCollision(taken));
        }

        let mut published = Vec::with_capacity(ids.len());
        for id in ids {
            let key = OneTimePreKey::generate(rng, id);
            published.push((id, *key.public_key()));
            self.store.store_one_time_pre_key(key)?;
        }
        self.next_one_time_id = last.checked_add(1);

        tracing::debug!(first_id = first, count, "generated one-time pre-keys");
        Ok(published)
    }

    /// Generates, signs and stores a signed pre-key, making it the active one.
    ///
    /// # Errors
    /// `Error::PreKeyIdCollision` if `id` is already stored.
    pub fn generate_signed_pre_key<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
        id: u32,
    ) -> Result<PublicKey> {
        self.generate_signed_pre_key_at(rng, id, SystemTime::now())
    }

    /// [`Self::generate_signed_pre_key`] with an explicit creation time.
    pub fn generate_signed_pre_key_at<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
        id: u32,
        created_at: SystemTime,
    ) -> Result<PublicKey> {
        let key = SignedPreKey::generate(rng, &self.identity, id, created_at);
        let public = *key.public_key();
        self.store.store_signed_pre_key(key)?;
        self.active_signed_pre_key = Some(id);

        tracing::debug!(id, "generated signed pre-key");
        Ok(public)
    }

    /// Replaces the active signed pre-key once it is older than the rotation
    /// period. Returns the new id when a rotation happened.
    ///
    /// # Errors
    /// `Error::PreKeyIdsExhausted` when the highest stored id is `u32::MAX`.
    pub fn rotate_signed_pre_key_if_due<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
        now: SystemTime,
    ) -> Result<Option<u32>> {
        let listed = self.store.list_signed_pre_keys()?;
        let due = match self.active_signed_pre_key {
            Some(id) => {
                let created_at = listed
                    .iter()
                    .find(|&&(listed_id, _)| listed_id == id)
                    .map(|&(_, created_at)| created_at)
                    .ok_or(Error::UnknownSignedPreKey(id))?;
                age(created_at, now) >= self.config.rotation_period
            }
            None => true,
        };
        if !due {
            return Ok(None);
        }

        let id = listed
            .iter()
            .map(|&(id, _)| id)
            .max()
            .map_or(Some(1), |max| max.checked_add(1))
            .ok_or(Error::PreKeyIdsExhausted)?;
        self.generate_signed_pre_key_at(rng, id, now)?;

        tracing::info!(id, "rotated signed pre-key");
        Ok(Some(id))
    }

    /// Deletes superseded signed pre-keys whose retention period has passed.
    ///
    /// A key counts as superseded from the creation time of the next newer
    /// key. The active key is never pruned. Returns the number deleted.
    pub fn prune_signed_pre_keys(&mut self, now: SystemTime) -> Result<usize> {
        let listed = self.store.list_signed_pre_keys()?;
        let mut pruned = 0;

        for pair in listed.windows(2) {
            let (id, _) = pair[0];
            let (_, superseded_at) = pair[1];
            if Some(id) == self.active_signed_pre_key {
                continue;
            }
            if age(superseded_at, now) >= self.config.retention_period
                && self.store.remove_signed_pre_key(id)?
            {
                pruned += 1;
            }
        }

        if pruned > 0 {
            tracing::debug!(pruned, "pruned superseded signed pre-keys");
        }
        Ok(pruned)
    }

    /// Builds a bundle around the active signed pre-key.
    ///
    /// Each call hands out a different one-time pre-key. When none is left the
    /// bundle omits it, or the call fails if the policy requires one.
    ///
    /// # Errors
    /// - `Error::UnknownSignedPreKey` / `Error::InvalidSessionState` without an
    ///   active signed pre-key
    /// - `Error::OneTimeKeyExhausted` when a one-time key is required but none
    ///   is left
    pub fn bundle(&self) -> Result<PreKeyBundle> {
        let spk_id = self
            .active_signed_pre_key
            .ok_or(Error::InvalidSessionState)?;
        let signed = self.signed_pre_key(spk_id)?;

        let one_time_pre_key = self.store.issue_one_time_pre_key()?;
        if one_time_pre_key.is_none() {
            if self.config.require_one_time_pre_key {
                tracing::warn!("no one-time pre-key left, refusing bundle");
                return Err(Error::OneTimeKeyExhausted);
            }
            tracing::warn!("no one-time pre-key left, issuing bundle without one");
        }

        Ok(PreKeyBundle {
            identity_key: *self.identity.public_key(),
            signed_pre_key_id: spk_id,
            signed_pre_key: *signed.public_key(),
            signature: *signed.signature(),
            one_time_pre_key,
        })
    }

    /// Removes a one-time pre-key for a handshake.
    ///
    /// # Errors
    /// `Error::OneTimeKeyExhausted` if it was already consumed or never issued.
    pub fn consume_one_time_pre_key(&self, id: u32) -> Result<OneTimePreKey> {
        self.store
            .consume_one_time_pre_key(id)?
            .ok_or(Error::OneTimeKeyExhausted)
    }

    /// Looks up a current or retained signed pre-key.
    pub fn signed_pre_key(&self, id: u32) -> Result<SignedPreKey> {
        self.store
            .signed_pre_key(id)?
            .ok_or(Error::UnknownSignedPreKey(id))
    }

    pub fn one_time_pre_key_count(&self) -> Result<usize> {
        self.store.one_time_pre_key_count()
    }
}

impl<S: PreKeyStore> std::fmt::Debug for PreKeyManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreKeyManager")
            .field("identity", self.identity.public_key())
            .field("active_signed_pre_key", &self.active_signed_pre_key)
            .field("next_one_time_id", &self.next_one_time_id)
            .finish_non_exhaustive()
    }
}

/// Time elapsed since `then`; zero if the clock went backwards.
fn age(then: SystemTime, now: SystemTime) -> Duration {
    now.duration_since(then).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn manager() -> PreKeyManager {
        let identity = IdentityKeyPair::generate(&mut OsRng);
        PreKeyManager::new(identity, PreKeyConfig::default()).unwrap()
    }

    #[test]
    fn test_batch_ids_are_sequential() {
        let mut manager = manager();
        let first = manager.generate_pre_key_batch(&mut OsRng, 3).unwrap();
        let second = manager.generate_pre_key_batch(&mut OsRng, 2).unwrap();

        let ids: Vec<u32> = first.iter().chain(&second).map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(manager.one_time_pre_key_count().unwrap(), 5);
    }

    #[test]
    fn test_invalid_batch_sizes() {
        let mut manager = manager();
        assert_eq!(
            manager.generate_pre_key_batch(&mut OsRng, 0),
            Err(Error::InvalidPreKeyCount)
        );
        assert_eq!(
            manager.generate_pre_key_batch(&mut OsRng, 1001),
            Err(Error::InvalidPreKeyCount)
        );
    }

    #[test]
    fn test_batch_collision_stores_nothing() {
        let mut manager = manager();
        manager
            .store()
            .store_one_time_pre_key(OneTimePreKey::generate(&mut OsRng, 2))
            .unwrap();

        assert_eq!(
            manager.generate_pre_key_batch(&mut OsRng, 3),
            Err(Error::PreKeyIdCollision(2))
        );
        assert_eq!(manager.one_time_pre_key_count().unwrap(), 1);
    }

    #[test]
    fn test_signed_pre_key_collision() {
        let mut manager = manager();
        manager.generate_signed_pre_key(&mut OsRng, 1).unwrap();
        assert_eq!(
            manager.generate_signed_pre_key(&mut OsRng, 1),
            Err(Error::PreKeyIdCollision(1))
        );
    }

    #[test]
    fn test_bundle_signature_verifies() {
        let mut manager = manager();
        manager.generate_signed_pre_key(&mut OsRng, 1).unwrap();
        manager.generate_pre_key_batch(&mut OsRng, 1).unwrap();

        let bundle = manager.bundle().unwrap();
        bundle.verify_signature().unwrap();
        assert_eq!(bundle.one_time_pre_key.map(|(id, _)| id), Some(1));
    }

    #[test]
    fn test_tampered_bundle_rejected() {
        let mut manager = manager();
        manager.generate_signed_pre_key(&mut OsRng, 1).unwrap();

        let mut bundle = manager.bundle().unwrap();
        bundle.signed_pre_key = SecretKey::generate(&mut OsRng).public_key();
        assert_eq!(
            bundle.verify_signature(),
            Err(Error::IdentityVerificationFailure)
        );
    }

    #[test]
    fn test_bundle_without_one_time_keys() {
        let mut manager = manager();
        manager.generate_signed_pre_key(&mut OsRng, 1).unwrap();
        assert!(manager.bundle().unwrap().one_time_pre_key.is_none());

        let identity = IdentityKeyPair::generate(&mut OsRng);
        let config = PreKeyConfig::default().with_require_one_time_pre_key(true);
        let mut strict = PreKeyManager::new(identity, config).unwrap();
        strict.generate_signed_pre_key(&mut OsRng, 1).unwrap();
        assert_eq!(strict.bundle(), Err(Error::OneTimeKeyExhausted));
    }

    #[test]
    fn test_bundle_requires_signed_pre_key() {
        assert_eq!(manager().bundle(), Err(Error::InvalidSessionState));
    }

    #[test]
    fn test_bundle_wire_format() {
        let mut manager = manager();
        manager.generate_signed_pre_key(&mut OsRng, 4).unwrap();
        manager.generate_pre_key_batch(&mut OsRng, 1).unwrap();

        let with_opk = manager.bundle().unwrap();
        let bytes = with_opk.to_bytes();
        assert_eq!(bytes.len(), BUNDLE_BASE_LEN + BUNDLE_OPK_LEN);
        assert_eq!(PreKeyBundle::from_bytes(&bytes).unwrap(), with_opk);

        let without_opk = manager.bundle().unwrap();
        let bytes = without_opk.to_bytes();
        assert_eq!(bytes.len(), BUNDLE_BASE_LEN);
        assert_eq!(PreKeyBundle::from_bytes(&bytes).unwrap(), without_opk);

        assert!(PreKeyBundle::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        let mut bad_flag = bytes.clone();
        *bad_flag.last_mut().unwrap() = 2;
        assert!(PreKeyBundle::from_bytes(&bad_flag).is_err());
    }

    #[test]
    fn test_rotation_and_pruning() {
        let mut manager = manager();
        let start = SystemTime::UNIX_EPOCH + DAY * 1000;

        assert_eq!(
            manager.rotate_signed_pre_key_if_due(&mut OsRng, start).unwrap(),
            Some(1)
        );
        assert_eq!(
            manager
                .rotate_signed_pre_key_if_due(&mut OsRng, start + DAY)
                .unwrap(),
            None
        );

        let rotated_at = start + DAY * 7;
        assert_eq!(
            manager
                .rotate_signed_pre_key_if_due(&mut OsRng, rotated_at)
                .unwrap(),
            Some(2)
        );
        assert_eq!(manager.active_signed_pre_key_id(), Some(2));

        // superseded key still answers handshakes inside the retention period
        assert_eq!(manager.prune_signed_pre_keys(rotated_at + DAY).unwrap(), 0);
        assert!(manager.signed_pre_key(1).is_ok());

        assert_eq!(
            manager.prune_signed_pre_keys(rotated_at + DAY * 30).unwrap(),
            1
        );
        assert_eq!(
            manager.signed_pre_key(1).unwrap_err(),
            Error::UnknownSignedPreKey(1)
        );
        assert!(manager.signed_pre_key(2).is_ok());
    }

    #[test]
    fn test_with_store_resumes_ids() {
        let mut manager = manager();
        manager.generate_signed_pre_key(&mut OsRng, 1).unwrap();
        manager.generate_pre_key_batch(&mut OsRng, 4).unwrap();

        let identity = manager.identity().clone();
        let store = manager.store().clone();
        let mut resumed =
            PreKeyManager::with_store(identity, store, PreKeyConfig::default()).unwrap();

        assert_eq!(resumed.active_signed_pre_key_id(), Some(1));
        let next = resumed.generate_pre_key_batch(&mut OsRng, 1).unwrap();
        assert_eq!(next[0].0, 5);
    }

    #[test]
    fn test_with_store_skips_consumed_ids() {
        let mut manager = manager();
        manager.generate_pre_key_batch(&mut OsRng, 4).unwrap();
        manager.consume_one_time_pre_key(3).unwrap();
        manager.consume_one_time_pre_key(4).unwrap();

        let identity = manager.identity().clone();
        let store = manager.store().clone();
        let mut resumed =
            PreKeyManager::with_store(identity, store, PreKeyConfig::default()).unwrap();

        let next = resumed.generate_pre_key_batch(&mut OsRng, 2).unwrap();
        let ids: Vec<u32> = next.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![5, 6]);
        assert_eq!(
            resumed.consume_one_time_pre_key(4).unwrap_err(),
            Error::OneTimeKeyExhausted
        );
    }

    #[test]
    fn test_one_time_ids_stop_at_max() {
        let identity = IdentityKeyPair::generate(&mut OsRng);
        let store = InMemoryPreKeyStore::new();
        store
            .store_one_time_pre_key(OneTimePreKey::generate(&mut OsRng, u32::MAX - 1))
            .unwrap();
        let mut manager =
            PreKeyManager::with_store(identity, store, PreKeyConfig::default()).unwrap();

        assert_eq!(
            manager.generate_pre_key_batch(&mut OsRng, 2),
            Err(Error::PreKeyIdsExhausted)
        );
        assert_eq!(manager.one_time_pre_key_count().unwrap(), 1);

        let last = manager.generate_pre_key_batch(&mut OsRng, 1).unwrap();
        assert_eq!(last[0].0, u32::MAX);
        assert_eq!(
            manager.generate_pre_key_batch(&mut OsRng, 1),
            Err(Error::PreKeyIdsExhausted)
        );
        assert_eq!(manager.one_time_pre_key_count().unwrap(), 2);
    }

    #[test]
    fn test_signed_rotation_stops_at_max_id() {
        let mut manager = manager();
        let start = SystemTime::UNIX_EPOCH + DAY * 1000;
        manager
            .generate_signed_pre_key_at(&mut OsRng, u32::MAX, start)
            .unwrap();

        assert_eq!(
            manager.rotate_signed_pre_key_if_due(&mut OsRng, start + DAY * 8),
            Err(Error::PreKeyIdsExhausted)
        );
        assert_eq!(manager.active_signed_pre_key_id(), Some(u32::MAX));
        assert_eq!(manager.store().list_signed_pre_keys().unwrap().len(), 1);
    }
}
