//! Message envelope wire format.
//!
//! ```text
//! version (1) || ratchet_key (32) || previous_chain (4 LE) || index (4 LE)
//!             || iv (12) || tag (16) || ciphertext
//! ```
//!
//! The 40 header bytes (ratchet key and both counters) are authenticated as
//! AEAD associated data, so rewriting any routing field breaks the tag.

use crate::aead::{IV_SIZE, TAG_SIZE};
use crate::error::{Error, Result};
use crate::keys::{PublicKey, KEY_SIZE};

/// Version byte leading every encoded envelope.
pub const PROTOCOL_VERSION: u8 = 1;

/// Encoded header size.
pub const HEADER_SIZE: usize = KEY_SIZE + 4 + 4;

/// Bytes in an envelope besides the ciphertext.
pub const ENVELOPE_OVERHEAD: usize = 1 + HEADER_SIZE + IV_SIZE + TAG_SIZE;

/// Message header: authenticated, not encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Sender's current ratchet public key
    pub ratchet_key: PublicKey,
    /// Length of the sender's previous sending chain
    pub previous_chain_count: u32,
    /// Index of this message in the current sending chain
    pub message_index: u32,
}

impl Header {
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[..KEY_SIZE].copy_from_slice(self.ratchet_key.as_bytes());
        bytes[KEY_SIZE..KEY_SIZE + 4].copy_from_slice(&self.previous_chain_count.to_le_bytes());
        bytes[KEY_SIZE + 4..].copy_from_slice(&self.message_index.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let header = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(header)
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            ratchet_key: reader.public_key()?,
            previous_chain_count: reader.u32_le()?,
            message_index: reader.u32_le()?,
        })
    }
}

/// Encrypted message as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub header: Header,
    pub iv: [u8; IV_SIZE],
    pub tag: [u8; TAG_SIZE],
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(ENVELOPE_OVERHEAD + self.ciphertext.len());
        bytes.push(PROTOCOL_VERSION);
        bytes.extend_from_slice(&self.header.to_bytes());
        bytes.extend_from_slice(&self.iv);
        bytes.extend_from_slice(&self.tag);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    /// Parses an envelope.
    ///
    /// # Errors
    /// `Error::InvalidMessageFormat` for truncated input or an unknown version.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        if reader.u8()? != PROTOCOL_VERSION {
            return Err(Error::InvalidMessageFormat);
        }
        let header = Header::read(&mut reader)?;
        let iv = reader.array::<IV_SIZE>()?;
        let tag = reader.array::<TAG_SIZE>()?;
        let ciphertext = reader.rest().to_vec();

        Ok(Self {
            header,
            iv,
            tag,
            ciphertext,
        })
    }
}

/// Cursor over fixed-layout wire bytes.
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub(crate) fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        if self.bytes.len() < N {
            return Err(Error::InvalidMessageFormat);
        }
        let (head, tail) = self.bytes.split_at(N);
        self.bytes = tail;
        head.try_into().map_err(|_| Error::InvalidMessageFormat)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub(crate) fn u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array::<4>()?))
    }

    pub(crate) fn public_key(&mut self) -> Result<PublicKey> {
        Ok(PublicKey::from_bytes(self.array::<KEY_SIZE>()?))
    }

    /// Optional trailing field introduced by a 0/1 presence flag.
    pub(crate) fn flag(&mut self) -> Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::InvalidMessageFormat),
        }
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.bytes)
    }

    /// Rejects trailing bytes.
    pub(crate) fn finish(&self) -> Result<()> {
        if self.bytes.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidMessageFormat)
        }
    }
}
