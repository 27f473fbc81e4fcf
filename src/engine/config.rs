//! Engine scan policy and tuning knobs.
//!
//! # Invariants
//! - `max_depth > 0`: a zero limit would reject every buffer.
//! - `max_ngram >= 2`: ngram sizes are searched in `1..max_ngram`.
//! - `dedup_shards` is a non-zero power of two (digest low bits pick a shard).
//!
//! # Design Notes
//! - Configuration is an explicit value handed to [`Engine::new`](super::Engine::new);
//!   nothing reads the environment implicitly. [`DebugFlags::from_env`] exists
//!   for drivers that want the `SCAN_DEBUG_*` variables and call it themselves.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffer::HashAlgorithm;
use crate::error::ConfigError;

/// Default recursion limit.
pub const DEFAULT_MAX_DEPTH: u32 = 12;
/// Default upper bound (exclusive) on repeating-ngram sizes.
pub const DEFAULT_MAX_NGRAM: usize = 10;
/// Recursive buffers smaller than this are processed on the calling thread.
pub const DEFAULT_SAME_THREAD_MAX: usize = 8192;

/// Debug knobs. All default to off.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugFlags {
    /// Process everything on the calling thread; no pool is started.
    pub single_threaded: bool,
    /// Log each dispatch step at `info` instead of `trace`.
    pub trace_steps: bool,
    /// Log a hex dump of each buffer before dispatch.
    pub dump_buffers: bool,
    /// Treat every buffer as never seen before.
    pub disable_dedup: bool,
    /// Skip ngram analysis; no scanner is bypassed for repeated content.
    pub disable_ngram_bypass: bool,
}

impl DebugFlags {
    /// Reads `SCAN_DEBUG_SINGLE_THREADED`, `SCAN_DEBUG_TRACE_STEPS`,
    /// `SCAN_DEBUG_DUMP_BUFFERS`, `SCAN_DEBUG_DISABLE_DEDUP` and
    /// `SCAN_DEBUG_DISABLE_NGRAM_BYPASS`. A variable counts as set when it
    /// is present and not `0`, `false` or empty.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| {
            lookup(key).is_some_and(|v| {
                let v = v.trim();
                !(v.is_empty() || v == "0" || v.eq_ignore_ascii_case("false"))
            })
        };
        Self {
            single_threaded: flag("SCAN_DEBUG_SINGLE_THREADED"),
            trace_steps: flag("SCAN_DEBUG_TRACE_STEPS"),
            dump_buffers: flag("SCAN_DEBUG_DUMP_BUFFERS"),
            disable_dedup: flag("SCAN_DEBUG_DISABLE_DEDUP"),
            disable_ngram_bypass: flag("SCAN_DEBUG_DISABLE_NGRAM_BYPASS"),
        }
    }
}

/// Engine configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Buffers whose depth reaches this value are rejected with an alert.
    pub max_depth: u32,
    /// Exclusive upper bound for repeating-ngram detection.
    pub max_ngram: usize,
    /// Worker threads. `0` processes everything on the calling thread.
    pub threads: usize,
    /// Recursive buffers below this size skip the queue.
    pub same_thread_max: usize,
    /// Split top-level buffers into one work unit per enabled scanner.
    pub fanout: bool,
    /// Content digest used for de-duplication, fixed for the whole scan.
    pub hash_algorithm: HashAlgorithm,
    /// Scanner calls slower than this are logged (never cancelled).
    pub slow_scanner_threshold: Duration,
    /// Sleep between liveness checks while joining the pool.
    pub join_poll_interval: Duration,
    /// Number of dedup table shards.
    pub dedup_shards: usize,
    pub debug: DebugFlags,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_ngram: DEFAULT_MAX_NGRAM,
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            same_thread_max: DEFAULT_SAME_THREAD_MAX,
            fanout: false,
            hash_algorithm: HashAlgorithm::default(),
            slow_scanner_threshold: Duration::from_secs(10),
            join_poll_interval: Duration::from_millis(10),
            dedup_shards: 64,
            debug: DebugFlags::default(),
        }
    }
}

impl EngineConfig {
    /// Configuration that never starts worker threads.
    pub fn single_threaded() -> Self {
        Self {
            threads: 0,
            ..Self::default()
        }
    }

    /// Validates cross-field invariants. Called by `Engine::new`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth == 0 {
            return Err(ConfigError::MaxDepthZero);
        }
        if self.max_ngram < 2 {
            return Err(ConfigError::MaxNgramTooSmall(self.max_ngram));
        }
        if !self.dedup_shards.is_power_of_two() {
            return Err(ConfigError::DedupShardsNotPowerOfTwo(self.dedup_shards));
        }
        if self.join_poll_interval.is_zero() {
            return Err(ConfigError::JoinPollIntervalZero);
        }
        Ok(())
    }

    /// True when buffers are processed on the calling thread only.
    #[inline]
    pub fn is_single_threaded(&self) -> bool {
        self.threads == 0 || self.debug.single_threaded
    }
}
