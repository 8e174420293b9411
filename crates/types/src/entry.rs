//! Entries and their submission metadata.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Fingerprint;

/// An immutable opaque payload submitted for eventual inclusion in a block.
///
/// Cloning an entry is cheap: the payload is reference counted and never
/// mutated after construction.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Entry(Bytes);

impl Entry {
    /// Create an entry from a payload
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self(payload.into())
    }

    /// Payload bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Payload size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Dedup fingerprint of the payload
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.0)
    }

    /// Consume the entry, returning the shared payload buffer
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() <= 16 {
            write!(f, "Entry(0x{})", hex::encode(&self.0))
        } else {
            write!(f, "Entry(0x{}.. {} bytes)", hex::encode(&self.0[..16]), self.0.len())
        }
    }
}

impl From<Bytes> for Entry {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for Entry {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<&[u8]> for Entry {
    fn from(bytes: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(bytes))
    }
}

impl<const N: usize> From<&[u8; N]> for Entry {
    fn from(bytes: &[u8; N]) -> Self {
        Self(Bytes::copy_from_slice(bytes))
    }
}

impl AsRef<[u8]> for Entry {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Identifier of the peer an entry was received from.
///
/// [`PeerId::UNKNOWN`] marks locally originated entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct PeerId(pub u16);

impl PeerId {
    /// Sentinel for "no peer" (local submission)
    pub const UNKNOWN: Self = Self(0);

    /// Whether this is the local sentinel
    #[inline]
    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            write!(f, "local")
        } else {
            write!(f, "peer-{}", self.0)
        }
    }
}

/// Metadata accompanying a submission.
///
/// Only used to avoid redundant rebroadcast; it never affects validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryInfo {
    /// Peer the entry was received from
    pub peer_id: PeerId,
}

impl EntryInfo {
    /// Info for an entry received from `peer_id`
    pub fn from_peer(peer_id: PeerId) -> Self {
        Self { peer_id }
    }

    /// Info for a locally originated entry
    pub fn local() -> Self {
        Self::default()
    }
}
