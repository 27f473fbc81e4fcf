//! Content digests used for buffer identity and de-duplication.
//!
//! A [`Digest`] is a fixed-size value (up to 32 bytes plus a length) that
//! can be copied into hash-table keys without allocation. SHA-1 output is 20
//! bytes; the rest of the array stays zero.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest as _, Sha256};

/// Hash function used for content identity.
///
/// The engine fixes one algorithm for the duration of a scan so that dedup
/// keys are comparable across buffers.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// BLAKE3 (default; fastest on large buffers).
    #[default]
    Blake3 = 0,
    /// SHA-256, for interoperability with external hash sets.
    Sha256 = 1,
    /// SHA-1, matching legacy hash sets and reports.
    Sha1 = 2,
}

impl HashAlgorithm {
    /// Number of supported algorithms (size of per-buffer digest caches).
    pub(crate) const COUNT: usize = 3;

    /// All supported algorithms.
    pub const ALL: [HashAlgorithm; Self::COUNT] =
        [HashAlgorithm::Blake3, HashAlgorithm::Sha256, HashAlgorithm::Sha1];

    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Short lowercase name (`blake3`, `sha256`, `sha1`).
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha1 => "sha1",
        }
    }

    /// Hashes `bytes` with this algorithm.
    pub fn digest(self, bytes: &[u8]) -> Digest {
        match self {
            HashAlgorithm::Blake3 => Digest::from_bytes(*blake3::hash(bytes).as_bytes()),
            HashAlgorithm::Sha256 => Digest::from_slice(&Sha256::digest(bytes)),
            HashAlgorithm::Sha1 => Digest::from_slice(&Sha1::digest(bytes)),
        }
    }
}

/// A content digest of at most [`Digest::MAX_LEN`] bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    bytes: [u8; Digest::MAX_LEN],
    len: u8,
}

impl Digest {
    /// Longest supported digest.
    pub const MAX_LEN: usize = 32;

    /// Wraps a full-width digest.
    pub const fn from_bytes(bytes: [u8; Self::MAX_LEN]) -> Self {
        Self {
            bytes,
            len: Self::MAX_LEN as u8,
        }
    }

    /// Copies a digest of at most `MAX_LEN` bytes; longer input is truncated.
    fn from_slice(out: &[u8]) -> Self {
        let len = out.len().min(Self::MAX_LEN);
        let mut bytes = [0u8; Self::MAX_LEN];
        bytes[..len].copy_from_slice(&out[..len]);
        Self {
            bytes,
            len: len as u8,
        }
    }

    /// Raw digest bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        self.to_string()
    }

    /// Shard index for a table with `shards` shards (`shards` must be a
    /// power of two). Digests are uniformly distributed, so the low bits of
    /// the first word are a good shard key.
    #[inline]
    pub(crate) fn shard(&self, shards: usize) -> usize {
        debug_assert!(shards.is_power_of_two());
        let mut w = [0u8; 8];
        w.copy_from_slice(&self.bytes[..8]);
        (u64::from_le_bytes(w) as usize) & (shards - 1)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.as_bytes() {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}
