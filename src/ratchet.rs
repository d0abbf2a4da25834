//! Double Ratchet state machine.
//!
//! Implements <https://signal.org/docs/specifications/doubleratchet/> over a
//! [`CryptoBackend`]. The state is owned by a [`crate::session::Session`] and
//! never exposed directly; it leaves the process only as a session snapshot.

use crate::backend::CryptoBackend;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::keys::{PublicKey, SecretKey, SymmetricKey, KEY_SIZE};
use crate::message::{Envelope, Header, HEADER_SIZE};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Bounded cache of message keys for messages not yet received.
///
/// Insertion order is kept so the oldest entry is evicted first once the
/// window is full, whatever epoch it belongs to.
#[derive(Default)]
struct SkippedKeys {
    keys: HashMap<(PublicKey, u32), SymmetricKey>,
    order: VecDeque<(PublicKey, u32)>,
}

impl SkippedKeys {
    fn insert(&mut self, ratchet_key: PublicKey, index: u32, key: SymmetricKey, capacity: usize) {
        while self.keys.len() >= capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if self.keys.remove(&oldest).is_some() {
                tracing::trace!(index = oldest.1, "evicted skipped message key");
            }
        }
        if self.keys.insert((ratchet_key, index), key).is_none() {
            self.order.push_back((ratchet_key, index));
        }
    }

    fn get(&self, ratchet_key: &PublicKey, index: u32) -> Option<&SymmetricKey> {
        self.keys.get(&(*ratchet_key, index))
    }

    fn take(&mut self, ratchet_key: &PublicKey, index: u32) -> Option<SymmetricKey> {
        let entry = (*ratchet_key, index);
        let key = self.keys.remove(&entry)?;
        self.order.retain(|queued| queued != &entry);
        Some(key)
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn iter(&self) -> impl Iterator<Item = (&(PublicKey, u32), &SymmetricKey)> + '_ {
        self.order
            .iter()
            .filter_map(|entry| self.keys.get_key_value(entry))
    }
}

/// Keys produced by a DH ratchet step.
struct EpochStep {
    remote: PublicKey,
    root_key: SymmetricKey,
    local_ratchet: SecretKey,
    sending_chain: SymmetricKey,
}

/// Receiving-side changes for one message, applied once it authenticates.
struct PendingReceive {
    epoch: Option<EpochStep>,
    receiving_chain: SymmetricKey,
    receive_count: u32,
    skipped: Vec<((PublicKey, u32), SymmetricKey)>,
}

/// Per-session ratchet state.
pub(crate) struct RatchetState {
    root_key: SymmetricKey,
    sending_chain: Option<SymmetricKey>,
    receiving_chain: Option<SymmetricKey>,
    local_ratchet: SecretKey,
    local_ratchet_public: PublicKey,
    remote_ratchet: Option<PublicKey>,
    send_count: u32,
    receive_count: u32,
    previous_send_count: u32,
    skipped: SkippedKeys,
    retired_remote_keys: VecDeque<PublicKey>,
    associated_data: Vec<u8>,
    config: SessionConfig,
}

impl RatchetState {
    /// Initiator side: performs the first DH step against the responder's
    /// signed pre-key, so the initiator can send immediately.
    pub(crate) fn init_initiator<B, R>(
        backend: &B,
        rng: &mut R,
        shared_secret: &SymmetricKey,
        associated_data: Vec<u8>,
        remote_ratchet: PublicKey,
        config: SessionConfig,
    ) -> Result<Self>
    where
        B: CryptoBackend + ?Sized,
        R: CryptoRngCore,
    {
        let local_ratchet = SecretKey::generate(rng);
        let dh_output = local_ratchet.diffie_hellman(&remote_ratchet);
        if !dh_output.is_contributory() {
            return Err(Error::InvalidPublicKey);
        }
        let (root_key, sending_chain) = backend.kdf_root(shared_secret, &dh_output)?;

        Ok(Self {
            root_key,
            sending_chain: Some(sending_chain),
            receiving_chain: None,
            local_ratchet_public: local_ratchet.public_key(),
            local_ratchet,
            remote_ratchet: Some(remote_ratchet),
            send_count: 0,
            receive_count: 0,
            previous_send_count: 0,
            skipped: SkippedKeys::default(),
            retired_remote_keys: VecDeque::new(),
            associated_data,
            config,
        })
    }

    /// Responder side: the signed pre-key pair is the first ratchet key pair.
    /// No chain exists until the initiator's first message arrives.
    pub(crate) fn init_responder(
        shared_secret: SymmetricKey,
        associated_data: Vec<u8>,
        local_ratchet: SecretKey,
        config: SessionConfig,
    ) -> Self {
        Self {
            root_key: shared_secret,
            sending_chain: None,
            receiving_chain: None,
            local_ratchet_public: local_ratchet.public_key(),
            local_ratchet,
            remote_ratchet: None,
            send_count: 0,
            receive_count: 0,
            previous_send_count: 0,
            skipped: SkippedKeys::default(),
            retired_remote_keys: VecDeque::new(),
            associated_data,
            config,
        }
    }

    pub(crate) fn can_send(&self) -> bool {
        self.sending_chain.is_some()
    }

    pub(crate) fn associated_data(&self) -> &[u8] {
        &self.associated_data
    }

    pub(crate) fn skipped_key_count(&self) -> usize {
        self.skipped.len()
    }

    /// Encrypts one message. State only advances when sealing succeeds.
    pub(crate) fn encrypt<B>(&mut self, backend: &B, plaintext: &[u8]) -> Result<Envelope>
    where
        B: CryptoBackend + ?Sized,
    {
        let chain = self
            .sending_chain
            .as_ref()
            .ok_or(Error::InvalidSessionState)?;
        let next_count = self
            .send_count
            .checked_add(1)
            .ok_or(Error::ChainExhausted)?;
        let (next_chain, message_key) = backend.kdf_chain(chain)?;

        let header = Header {
            ratchet_key: self.local_ratchet_public,
            previous_chain_count: self.previous_send_count,
            message_index: self.send_count,
        };
        let sealed = backend.seal(&message_key, plaintext, &self.message_ad(&header))?;
        drop(message_key);

        self.sending_chain = Some(next_chain);
        self.send_count = next_count;

        Ok(Envelope {
            header,
            iv: sealed.iv,
            tag: sealed.tag,
            ciphertext: sealed.ciphertext,
        })
    }

    /// Decrypts one message.
    ///
    /// All-or-nothing: chain steps and skipped keys are staged in a
    /// [`PendingReceive`] and applied only once the message authenticates.
    pub(crate) fn decrypt<B, R>(
        &mut self,
        backend: &B,
        rng: &mut R,
        envelope: &Envelope,
    ) -> Result<Vec<u8>>
    where
        B: CryptoBackend + ?Sized,
        R: CryptoRngCore,
    {
        let header = &envelope.header;

        if let Some(message_key) = self.skipped.get(&header.ratchet_key, header.message_index) {
            tracing::trace!(index = header.message_index, "using skipped message key");
            let plaintext = self.open(backend, message_key, envelope)?;
            self.skipped.take(&header.ratchet_key, header.message_index);
            return Ok(plaintext);
        }

        let mut skipped = Vec::new();
        let (epoch, chain, count) = if Some(header.ratchet_key) == self.remote_ratchet {
            if header.message_index < self.receive_count {
                tracing::warn!(index = header.message_index, "replayed or expired message");
                return Err(Error::MessageUnrecoverable);
            }
            let chain = self
                .receiving_chain
                .clone()
                .ok_or(Error::InvalidSessionState)?;
            (None, chain, self.receive_count)
        } else {
            if self.retired_remote_keys.contains(&header.ratchet_key) {
                tracing::warn!(
                    index = header.message_index,
                    "message from retired ratchet epoch"
                );
                return Err(Error::MessageUnrecoverable);
            }
            if let (Some(chain), Some(remote)) = (&self.receiving_chain, self.remote_ratchet) {
                self.derive_skipped(
                    backend,
                    remote,
                    chain.clone(),
                    self.receive_count,
                    header.previous_chain_count,
                    &mut skipped,
                )?;
            }
            let (step, receiving_chain) = self.dh_step(backend, rng, header.ratchet_key)?;
            (Some(step), receiving_chain, 0)
        };

        let chain = self.derive_skipped(
            backend,
            header.ratchet_key,
            chain,
            count,
            header.message_index,
            &mut skipped,
        )?;
        let (receiving_chain, message_key) = backend.kdf_chain(&chain)?;
        let receive_count = header
            .message_index
            .checked_add(1)
            .ok_or(Error::ChainExhausted)?;

        let plaintext = self.open(backend, &message_key, envelope)?;
        self.commit(PendingReceive {
            epoch,
            receiving_chain,
            receive_count,
            skipped,
        });
        Ok(plaintext)
    }

    /// DH ratchet step on a new remote ratchet key. Returns the new epoch and
    /// its receiving chain without touching `self`.
    fn dh_step<B, R>(
        &self,
        backend: &B,
        rng: &mut R,
        remote: PublicKey,
    ) -> Result<(EpochStep, SymmetricKey)>
    where
        B: CryptoBackend + ?Sized,
        R: CryptoRngCore,
    {
        let dh_output = self.local_ratchet.diffie_hellman(&remote);
        if !dh_output.is_contributory() {
            return Err(Error::InvalidPublicKey);
        }
        let (root_key, receiving_chain) = backend.kdf_root(&self.root_key, &dh_output)?;

        let local_ratchet = SecretKey::generate(rng);
        let dh_output = local_ratchet.diffie_hellman(&remote);
        let (root_key, sending_chain) = backend.kdf_root(&root_key, &dh_output)?;

        let step = EpochStep {
            remote,
            root_key,
            local_ratchet,
            sending_chain,
        };
        Ok((step, receiving_chain))
    }

    /// Derives message keys of `chain` from index `from` up to (excluding)
    /// `until` into `out`, returning the advanced chain key.
    fn derive_skipped<B>(
        &self,
        backend: &B,
        remote: PublicKey,
        mut chain: SymmetricKey,
        from: u32,
        until: u32,
        out: &mut Vec<((PublicKey, u32), SymmetricKey)>,
    ) -> Result<SymmetricKey>
    where
        B: CryptoBackend + ?Sized,
    {
        if until <= from {
            return Ok(chain);
        }
        let gap = until - from;
        if gap > self.config.max_skip {
            tracing::warn!(gap, max_skip = self.config.max_skip, "skip window exceeded");
            return Err(Error::SkipWindowExceeded);
        }

        for index in from..until {
            let (next_chain, message_key) = backend.kdf_chain(&chain)?;
            out.push(((remote, index), message_key));
            chain = next_chain;
        }
        Ok(chain)
    }

    fn commit(&mut self, pending: PendingReceive) {
        let PendingReceive {
            epoch,
            receiving_chain,
            receive_count,
            skipped,
        } = pending;

        if let Some(EpochStep {
            remote,
            root_key,
            local_ratchet,
            sending_chain,
        }) = epoch
        {
            if let Some(previous) = self.remote_ratchet.replace(remote) {
                self.retired_remote_keys.push_back(previous);
                while self.retired_remote_keys.len() > self.config.max_retired_epochs {
                    self.retired_remote_keys.pop_front();
                }
            }
            self.previous_send_count = self.send_count;
            self.send_count = 0;
            self.root_key = root_key;
            self.local_ratchet_public = local_ratchet.public_key();
            self.local_ratchet = local_ratchet;
            self.sending_chain = Some(sending_chain);

            tracing::debug!(remote = ?remote, "dh ratchet step");
        }

        if !skipped.is_empty() {
            tracing::trace!(skipped = skipped.len(), "cached skipped message keys");
        }
        for ((ratchet_key, index), key) in skipped {
            self.skipped
                .insert(ratchet_key, index, key, self.config.max_skipped_keys);
        }

        self.receiving_chain = Some(receiving_chain);
        self.receive_count = receive_count;
    }

    fn open<B>(&self, backend: &B, message_key: &SymmetricKey, envelope: &Envelope) -> Result<Vec<u8>>
    where
        B: CryptoBackend + ?Sized,
    {
        backend
            .open(
                message_key,
                &envelope.ciphertext,
                &envelope.iv,
                &envelope.tag,
                &self.message_ad(&envelope.header),
            )
            .map_err(|err| {
                tracing::warn!(index = envelope.header.message_index, "message authentication failed");
                err
            })
    }

    /// `X3DH associated data || header bytes`
    fn message_ad(&self, header: &Header) -> Vec<u8> {
        let mut ad = Vec::with_capacity(self.associated_data.len() + HEADER_SIZE);
        ad.extend_from_slice(&self.associated_data);
        ad.extend_from_slice(&header.to_bytes());
        ad
    }

    pub(crate) fn to_snapshot(&self) -> RatchetSnapshot {
        RatchetSnapshot {
            root_key: *self.root_key.as_bytes(),
            sending_chain: self.sending_chain.as_ref().map(|key| *key.as_bytes()),
            receiving_chain: self.receiving_chain.as_ref().map(|key| *key.as_bytes()),
            local_ratchet: *self.local_ratchet.expose_bytes(),
            remote_ratchet: self.remote_ratchet.map(|key| *key.as_bytes()),
            send_count: self.send_count,
            receive_count: self.receive_count,
            previous_send_count: self.previous_send_count,
            skipped: self
                .skipped
                .iter()
                .map(|((ratchet_key, index), key)| SkippedEntry {
                    ratchet_key: *ratchet_key.as_bytes(),
                    index: *index,
                    message_key: *key.as_bytes(),
                })
                .collect(),
            retired_remote_keys: self
                .retired_remote_keys
                .iter()
                .map(|key| *key.as_bytes())
                .collect(),
            associated_data: self.associated_data.clone(),
        }
    }

    /// Rebuilds state from a snapshot.
    ///
    /// # Errors
    /// `Error::SessionCorrupted` if the snapshot is internally inconsistent.
    pub(crate) fn from_snapshot(snapshot: &RatchetSnapshot, config: SessionConfig) -> Result<Self> {
        if snapshot.sending_chain.is_some() && snapshot.remote_ratchet.is_none() {
            return Err(Error::SessionCorrupted);
        }
        if snapshot.receiving_chain.is_some() && snapshot.remote_ratchet.is_none() {
            return Err(Error::SessionCorrupted);
        }

        let local_ratchet = SecretKey::from_bytes(snapshot.local_ratchet);
        let mut skipped = SkippedKeys::default();
        for entry in &snapshot.skipped {
            if skipped
                .keys
                .contains_key(&(PublicKey::from_bytes(entry.ratchet_key), entry.index))
            {
                return Err(Error::SessionCorrupted);
            }
            skipped.insert(
                PublicKey::from_bytes(entry.ratchet_key),
                entry.index,
                SymmetricKey::from_bytes(entry.message_key),
                config.max_skipped_keys,
            );
        }

        let mut retired_remote_keys: VecDeque<PublicKey> = snapshot
            .retired_remote_keys
            .iter()
            .map(|bytes| PublicKey::from_bytes(*bytes))
            .collect();
        while retired_remote_keys.len() > config.max_retired_epochs {
            retired_remote_keys.pop_front();
        }

        Ok(Self {
            root_key: SymmetricKey::from_bytes(snapshot.root_key),
            sending_chain: snapshot.sending_chain.map(SymmetricKey::from_bytes),
            receiving_chain: snapshot.receiving_chain.map(SymmetricKey::from_bytes),
            local_ratchet_public: local_ratchet.public_key(),
            local_ratchet,
            remote_ratchet: snapshot.remote_ratchet.map(PublicKey::from_bytes),
            send_count: snapshot.send_count,
            receive_count: snapshot.receive_count,
            previous_send_count: snapshot.previous_send_count,
            skipped,
            retired_remote_keys,
            associated_data: snapshot.associated_data.clone(),
            config,
        })
    }
}

impl std::fmt::Debug for RatchetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatchetState")
            .field("local_ratchet", &self.local_ratchet_public)
            .field("remote_ratchet", &self.remote_ratchet)
            .field("send_count", &self.send_count)
            .field("receive_count", &self.receive_count)
            .field("skipped_keys", &self.skipped.len())
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub(crate) struct SkippedEntry {
    ratchet_key: [u8; KEY_SIZE],
    index: u32,
    message_key: [u8; KEY_SIZE],
}

/// Serializable form of [`RatchetState`], wiped on drop.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub(crate) struct RatchetSnapshot {
    root_key: [u8; KEY_SIZE],
    sending_chain: Option<[u8; KEY_SIZE]>,
    receiving_chain: Option<[u8; KEY_SIZE]>,
    local_ratchet: [u8; KEY_SIZE],
    remote_ratchet: Option<[u8; KEY_SIZE]>,
    send_count: u32,
    receive_count: u32,
    previous_send_count: u32,
    skipped: Vec<SkippedEntry>,
    retired_remote_keys: Vec<[u8; KEY_SIZE]>,
    associated_data: Vec<u8>,
}

impl RatchetSnapshot {
    pub(crate) fn has_sending_chain(&self) -> bool {
        self.sending_chain.is_some()
    }

    pub(crate) fn has_remote_ratchet(&self) -> bool {
        self.remote_ratchet.is_some()
    }
}
