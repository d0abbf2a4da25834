//! Storage seam for pre-key material.
//!
//! The protocol code talks to [`PreKeyStore`] only. Durable stores live
//! outside this crate; [`InMemoryPreKeyStore`] covers tests and processes that
//! republish their keys on start.

use crate::error::{Error, Result};
use crate::keys::PublicKey;
use crate::prekey::{OneTimePreKey, SignedPreKey};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

/// Storage backend for one-time and signed pre-keys.
///
/// Implementations must be `Send + Sync`: several handshakes may read the
/// store at once. [`PreKeyStore::consume_one_time_pre_key`] must be an atomic
/// check-and-delete so a key can never be handed to two handshakes.
pub trait PreKeyStore: Send + Sync {
    /// Stores a one-time pre-key and raises the high-water mark reported by
    /// [`PreKeyStore::last_one_time_pre_key_id`] to its id.
    ///
    /// # Errors
    /// `Error::PreKeyIdCollision` if the id is taken; the existing key is kept.
    fn store_one_time_pre_key(&self, key: OneTimePreKey) -> Result<()>;

    /// Highest one-time pre-key id ever stored, consumed keys included.
    ///
    /// Durable stores must persist this alongside the keys: a manager rebuilt
    /// over the store continues after it, so consumed ids are never handed out
    /// again.
    fn last_one_time_pre_key_id(&self) -> Result<Option<u32>>;

    /// Removes and returns a one-time pre-key. `None` if it was never stored
    /// or has already been consumed.
    fn consume_one_time_pre_key(&self, id: u32) -> Result<Option<OneTimePreKey>>;

    /// Marks the lowest-id one-time pre-key not yet placed in a bundle as
    /// issued and returns its public half.
    ///
    /// Issued keys stay in the store until a handshake consumes them.
    fn issue_one_time_pre_key(&self) -> Result<Option<(u32, PublicKey)>>;

    /// Ids of all stored one-time pre-keys, ascending.
    fn list_one_time_pre_keys(&self) -> Result<Vec<u32>>;

    fn one_time_pre_key_count(&self) -> Result<usize>;

    /// Stores a signed pre-key.
    ///
    /// # Errors
    /// `Error::PreKeyIdCollision` if the id is taken.
    fn store_signed_pre_key(&self, key: SignedPreKey) -> Result<()>;

    fn signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKey>>;

    /// Deletes a signed pre-key; returns whether it existed.
    fn remove_signed_pre_key(&self, id: u32) -> Result<bool>;

    /// `(id, created_at)` of every stored signed pre-key, oldest first.
    fn list_signed_pre_keys(&self) -> Result<Vec<(u32, SystemTime)>>;
}

#[derive(Debug)]
struct OneTimeEntry {
    key: OneTimePreKey,
    issued: bool,
}

#[derive(Debug, Default)]
struct OneTimeKeys {
    entries: BTreeMap<u32, OneTimeEntry>,
    last_id: Option<u32>,
}

/// Thread-safe in-memory pre-key storage.
///
/// Clones share the same underlying maps.
///
/// # Example
/// ```
/// # use ratchet_session::storage::{InMemoryPreKeyStore, PreKeyStore};
/// let store = InMemoryPreKeyStore::new();
/// assert_eq!(store.one_time_pre_key_count().unwrap(), 0);
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryPreKeyStore {
    one_time: Arc<Mutex<OneTimeKeys>>,
    signed: Arc<RwLock<BTreeMap<u32, SignedPreKey>>>,
}

impl InMemoryPreKeyStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreKeyStore for InMemoryPreKeyStore {
    fn store_one_time_pre_key(&self, key: OneTimePreKey) -> Result<()> {
        let mut store = self.one_time.lock().map_err(|_| Error::StorageError)?;
        let id = key.id();
        if store.entries.contains_key(&id) {
            return Err(Error::PreKeyIdCollision(id));
        }
        store.entries.insert(id, OneTimeEntry { key, issued: false });
        store.last_id = store.last_id.max(Some(id));
        Ok(())
    }

    fn last_one_time_pre_key_id(&self) -> Result<Option<u32>> {
        let store = self.one_time.lock().map_err(|_| Error::StorageError)?;
        Ok(store.last_id)
    }

    fn consume_one_time_pre_key(&self, id: u32) -> Result<Option<OneTimePreKey>> {
        let mut store = self.one_time.lock().map_err(|_| Error::StorageError)?;
        Ok(store.entries.remove(&id).map(|entry| entry.key))
    }

    fn issue_one_time_pre_key(&self) -> Result<Option<(u32, PublicKey)>> {
        let mut store = self.one_time.lock().map_err(|_| Error::StorageError)?;
        Ok(store.entries.values_mut().find(|entry| !entry.issued).map(|entry| {
            entry.issued = true;
            (entry.key.id(), *entry.key.public_key())
        }))
    }

    fn list_one_time_pre_keys(&self) -> Result<Vec<u32>> {
        let store = self.one_time.lock().map_err(|_| Error::StorageError)?;
        Ok(store.entries.keys().copied().collect())
    }

    fn one_time_pre_key_count(&self) -> Result<usize> {
        let store = self.one_time.lock().map_err(|_| Error::StorageError)?;
        Ok(store.entries.len())
    }

    fn store_signed_pre_key(&self, key: SignedPreKey) -> Result<()> {
        let mut store = self.signed.write().map_err(|_| Error::StorageError)?;
        let id = key.id();
        if store.contains_key(&id) {
            return Err(Error::PreKeyIdCollision(id));
        }
        store.insert(id, key);
        Ok(())
    }

    fn signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKey>> {
        let store = self.signed.read().map_err(|_| Error::StorageError)?;
        Ok(store.get(&id).cloned())
    }

    fn remove_signed_pre_key(&self, id: u32) -> Result<bool> {
        let mut store = self.signed.write().map_err(|_| Error::StorageError)?;
        Ok(store.remove(&id).is_some())
    }

    fn list_signed_pre_keys(&self) -> Result<Vec<(u32, SystemTime)>> {
        let store = self.signed.read().map_err(|_| Error::StorageError)?;
        let mut keys: Vec<_> = store
            .values()
            .map(|key| (key.id(), key.created_at()))
            .collect();
        keys.sort_by_key(|&(id, created_at)| (created_at, id));
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::IdentityKeyPair;
    use rand_core::OsRng;
    use std::thread;

    #[test]
    fn test_in_memory_storage() {
        let store = InMemoryPreKeyStore::new();

        store
            .store_one_time_pre_key(OneTimePreKey::generate(&mut OsRng, 1))
            .unwrap();
        store
            .store_one_time_pre_key(OneTimePreKey::generate(&mut OsRng, 2))
            .unwrap();
        assert_eq!(store.one_time_pre_key_count().unwrap(), 2);

        assert!(store.consume_one_time_pre_key(1).unwrap().is_some());
        assert!(store.consume_one_time_pre_key(1).unwrap().is_none());
        assert_eq!(store.list_one_time_pre_keys().unwrap(), vec![2]);
    }

    #[test]
    fn test_last_id_survives_consumption() {
        let store = InMemoryPreKeyStore::new();
        assert_eq!(store.last_one_time_pre_key_id().unwrap(), None);

        for id in [4, 9, 2] {
            store
                .store_one_time_pre_key(OneTimePreKey::generate(&mut OsRng, id))
                .unwrap();
        }
        assert!(store.consume_one_time_pre_key(9).unwrap().is_some());

        assert_eq!(store.list_one_time_pre_keys().unwrap(), vec![2, 4]);
        assert_eq!(store.last_one_time_pre_key_id().unwrap(), Some(9));
    }

    #[test]
    fn test_collision_keeps_existing_key() {
        let store = InMemoryPreKeyStore::new();
        let first = OneTimePreKey::generate(&mut OsRng, 5);
        let first_public = *first.public_key();
        store.store_one_time_pre_key(first).unwrap();

        let result = store.store_one_time_pre_key(OneTimePreKey::generate(&mut OsRng, 5));
        assert_eq!(result, Err(Error::PreKeyIdCollision(5)));

        let kept = store.consume_one_time_pre_key(5).unwrap().unwrap();
        assert_eq!(kept.public_key(), &first_public);
    }

    #[test]
    fn test_issue_walks_unissued_keys() {
        let store = InMemoryPreKeyStore::new();
        for id in [3, 1, 2] {
            store
                .store_one_time_pre_key(OneTimePreKey::generate(&mut OsRng, id))
                .unwrap();
        }

        let issued: Vec<u32> = (0..3)
            .map(|_| store.issue_one_time_pre_key().unwrap().unwrap().0)
            .collect();
        assert_eq!(issued, vec![1, 2, 3]);
        assert!(store.issue_one_time_pre_key().unwrap().is_none());
        assert_eq!(store.one_time_pre_key_count().unwrap(), 3);
    }

    #[test]
    fn test_signed_pre_key_storage() {
        let identity = IdentityKeyPair::generate(&mut OsRng);
        let store = InMemoryPreKeyStore::new();
        let spk = SignedPreKey::generate(&mut OsRng, &identity, 9, SystemTime::now());

        store.store_signed_pre_key(spk.clone()).unwrap();
        assert_eq!(
            store.store_signed_pre_key(spk),
            Err(Error::PreKeyIdCollision(9))
        );
        assert!(store.signed_pre_key(9).unwrap().is_some());
        assert!(store.remove_signed_pre_key(9).unwrap());
        assert!(!store.remove_signed_pre_key(9).unwrap());
    }

    #[test]
    fn test_concurrent_consumption_is_single_use() {
        let store = InMemoryPreKeyStore::new();
        store
            .store_one_time_pre_key(OneTimePreKey::generate(&mut OsRng, 7))
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || store.consume_one_time_pre_key(7).unwrap().is_some())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
