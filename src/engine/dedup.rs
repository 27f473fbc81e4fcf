//! Concurrent content-digest counter backing seen-before detection.
//!
//! [`SeenTable`] maps each content digest to the number of times a buffer
//! with that digest entered dispatch. [`SeenTable::observe`] performs the
//! lookup and the increment under one shard lock, so for N concurrent
//! observations of the same digest the returned prior counts are exactly
//! `0..N` in some order: one caller sees "new", every other caller sees
//! "seen before".
//!
//! # Thread safety
//!
//! Shards are independent `Mutex<AHashMap>`s, each padded to its own cache
//! line. Digests are uniformly distributed, so the low bits of the digest
//! pick the shard.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use ahash::AHashMap;
use crossbeam_utils::CachePadded;

use crate::buffer::Digest;

pub(crate) struct SeenTable {
    shards: Box<[CachePadded<Mutex<AHashMap<Digest, u64>>>]>,
    dup_bytes: AtomicU64,
    duplicates: AtomicU64,
}

impl SeenTable {
    /// Creates a table with `shards` shards (`shards` must be a power of two).
    pub(crate) fn new(shards: usize) -> Self {
        debug_assert!(shards.is_power_of_two());
        Self {
            shards: (0..shards)
                .map(|_| CachePadded::new(Mutex::new(AHashMap::new())))
                .collect(),
            dup_bytes: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
        }
    }

    /// Records one observation of `digest` for a buffer of `len` bytes and
    /// returns how many times it was observed before.
    pub(crate) fn observe(&self, digest: &Digest, len: usize) -> u64 {
        let shard = &self.shards[digest.shard(self.shards.len())];
        let prior = {
            let mut map = shard.lock().expect("seen table shard poisoned");
            let count = map.entry(*digest).or_insert(0);
            let prior = *count;
            *count += 1;
            prior
        };
        if prior > 0 {
            self.dup_bytes.fetch_add(len as u64, Ordering::Relaxed);
            self.duplicates.fetch_add(1, Ordering::Relaxed);
        }
        prior
    }

    /// Observation count for `digest`.
    #[cfg(test)]
    pub(crate) fn count(&self, digest: &Digest) -> u64 {
        let shard = &self.shards[digest.shard(self.shards.len())];
        let map = shard.lock().expect("seen table shard poisoned");
        map.get(digest).copied().unwrap_or(0)
    }

    /// Total bytes of buffers that were seen before.
    pub(crate) fn dup_bytes(&self) -> u64 {
        self.dup_bytes.load(Ordering::Relaxed)
    }

    /// Number of observations that were repeats.
    pub(crate) fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    /// Number of distinct digests observed.
    pub(crate) fn unique(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().expect("seen table shard poisoned").len())
            .sum()
    }
}
