//! Scan statistics: per-scanner counters, bypass counts, and the final
//! report.
//!
//! # Design
//!
//! ```text
//!   dispatch (any thread)                       shutdown / stats()
//!   ─────────────────────                       ──────────────────
//!   ScannerCounters[i].record(..)  ──atomics──►  ScannerStats (plain)
//!   bypass[reason].fetch_add(1)                  ScanReport (serde)
//! ```
//!
//! Counters are relaxed atomics padded to a cache line per scanner so
//! workers running different scanners do not false-share. Snapshots are
//! not linearizable across counters; they are exact once the pool is
//! joined.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;
use serde::{Deserialize, Serialize};

use crate::pool::PoolStats;

// ============================================================================
// Latency histogram
// ============================================================================

const BUCKETS: usize = 64;

/// Bucket index for a value: `0` and `1` map to bucket 0, `2^k..2^(k+1)` to
/// bucket `k`.
#[inline(always)]
fn bucket_index(v: u64) -> usize {
    if v == 0 {
        return 0;
    }
    (63 - v.leading_zeros()) as usize
}

/// Lock-free log2-bucketed histogram of nanosecond latencies.
pub(crate) struct AtomicLog2Hist {
    buckets: [AtomicU64; BUCKETS],
    count: AtomicU64,
    sum: AtomicU64,
}

impl AtomicLog2Hist {
    pub(crate) fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn record(&self, v: u64) {
        self.buckets[bucket_index(v)].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(v, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> LatencyHistogram {
        LatencyHistogram {
            buckets: self
                .buckets
                .iter()
                .map(|b| b.load(Ordering::Relaxed))
                .collect(),
            count: self.count.load(Ordering::Relaxed),
            sum: self.sum.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a latency histogram.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyHistogram {
    /// Count per log2 bucket (bucket `k` covers `[2^k, 2^(k+1))` ns).
    pub buckets: Vec<u64>,
    pub count: u64,
    /// Sum of all recorded nanoseconds.
    pub sum: u64,
}

impl LatencyHistogram {
    /// Mean latency in nanoseconds, 0 when empty.
    pub fn mean(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.sum / self.count
        }
    }

    /// Upper bound (exclusive) of the bucket holding quantile `q` in `[0, 1]`.
    /// Log2 buckets make this accurate to within a factor of two.
    pub fn quantile_upper_bound(&self, q: f64) -> u64 {
        if self.count == 0 {
            return 0;
        }
        let target = ((self.count as f64) * q.clamp(0.0, 1.0)).ceil().max(1.0) as u64;
        let mut acc = 0u64;
        for (i, &c) in self.buckets.iter().enumerate() {
            acc += c;
            if acc >= target {
                return if i >= 63 { u64::MAX } else { 1u64 << (i + 1) };
            }
        }
        u64::MAX
    }
}

// ============================================================================
// Bypass reasons
// ============================================================================

/// Why a scanner was skipped for a buffer, in evaluation order.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BypassReason {
    Disabled = 0,
    TooSmall = 1,
    DepthZeroOnly = 2,
    SeenBefore = 3,
    RepeatingNgram = 4,
    TooFewDistinctBytes = 5,
    SelfRecursion = 6,
    NoMemoryHint = 7,
    NoFilesystemHint = 8,
}

impl BypassReason {
    pub(crate) const COUNT: usize = 9;

    pub const ALL: [BypassReason; Self::COUNT] = [
        BypassReason::Disabled,
        BypassReason::TooSmall,
        BypassReason::DepthZeroOnly,
        BypassReason::SeenBefore,
        BypassReason::RepeatingNgram,
        BypassReason::TooFewDistinctBytes,
        BypassReason::SelfRecursion,
        BypassReason::NoMemoryHint,
        BypassReason::NoFilesystemHint,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BypassReason::Disabled => "disabled",
            BypassReason::TooSmall => "too_small",
            BypassReason::DepthZeroOnly => "depth0_only",
            BypassReason::SeenBefore => "seen_before",
            BypassReason::RepeatingNgram => "repeating_ngram",
            BypassReason::TooFewDistinctBytes => "too_few_distinct_bytes",
            BypassReason::SelfRecursion => "self_recursion",
            BypassReason::NoMemoryHint => "no_memory_hint",
            BypassReason::NoFilesystemHint => "no_filesystem_hint",
        }
    }
}

// ============================================================================
// Live counters
// ============================================================================

/// Per-scanner counters updated by dispatch.
pub(crate) struct ScannerCounters {
    calls: AtomicU64,
    bytes: AtomicU64,
    nanos: AtomicU64,
    errors: AtomicU64,
    panics: AtomicU64,
    slow_calls: AtomicU64,
    latency: AtomicLog2Hist,
}

impl ScannerCounters {
    fn new() -> Self {
        Self {
            calls: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            nanos: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            panics: AtomicU64::new(0),
            slow_calls: AtomicU64::new(0),
            latency: AtomicLog2Hist::new(),
        }
    }

    pub(crate) fn record_call(&self, bytes: usize, nanos: u64, slow: bool) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.nanos.fetch_add(nanos, Ordering::Relaxed);
        self.latency.record(nanos);
        if slow {
            self.slow_calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_panic(&self) {
        self.panics.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, name: &str) -> ScannerStats {
        ScannerStats {
            name: name.to_string(),
            calls: self.calls.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            nanos: self.nanos.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
            slow_calls: self.slow_calls.load(Ordering::Relaxed),
            latency: self.latency.snapshot(),
        }
    }
}

/// All live engine counters.
pub(crate) struct EngineCounters {
    scanners: Box<[CachePadded<ScannerCounters>]>,
    bypass: [AtomicU64; BypassReason::COUNT],
    buffers_processed: AtomicU64,
    bytes_processed: AtomicU64,
    depth_limit_hits: AtomicU64,
    ngram_buffers: AtomicU64,
    max_depth_seen: AtomicU32,
}

impl EngineCounters {
    pub(crate) fn new(scanner_count: usize) -> Self {
        Self {
            scanners: (0..scanner_count)
                .map(|_| CachePadded::new(ScannerCounters::new()))
                .collect(),
            bypass: std::array::from_fn(|_| AtomicU64::new(0)),
            buffers_processed: AtomicU64::new(0),
            bytes_processed: AtomicU64::new(0),
            depth_limit_hits: AtomicU64::new(0),
            ngram_buffers: AtomicU64::new(0),
            max_depth_seen: AtomicU32::new(0),
        }
    }

    #[inline]
    pub(crate) fn scanner(&self, index: usize) -> &ScannerCounters {
        &self.scanners[index]
    }

    #[inline]
    pub(crate) fn record_bypass(&self, reason: BypassReason) {
        self.bypass[reason as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_buffer(&self, len: usize, depth: u32) {
        self.buffers_processed.fetch_add(1, Ordering::Relaxed);
        self.bytes_processed.fetch_add(len as u64, Ordering::Relaxed);
        self.max_depth_seen.fetch_max(depth, Ordering::Relaxed);
    }

    pub(crate) fn record_depth_limit(&self) {
        self.depth_limit_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ngram_buffer(&self) {
        self.ngram_buffers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn max_depth_seen(&self) -> u32 {
        self.max_depth_seen.load(Ordering::Relaxed)
    }

    pub(crate) fn bypass_count(&self, reason: BypassReason) -> u64 {
        self.bypass[reason as usize].load(Ordering::Relaxed)
    }

    pub(crate) fn snapshot<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
        dedup: DedupStats,
        pool: Option<PoolStats>,
    ) -> ScanReport {
        let scanners = names
            .into_iter()
            .zip(self.scanners.iter())
            .map(|(name, c)| c.snapshot(name))
            .collect::<Vec<_>>();
        let bypass = BypassReason::ALL
            .iter()
            .map(|&r| (r.as_str().to_string(), self.bypass_count(r)))
            .filter(|(_, n)| *n > 0)
            .collect();
        ScanReport {
            buffers_processed: self.buffers_processed.load(Ordering::Relaxed),
            bytes_processed: self.bytes_processed.load(Ordering::Relaxed),
            max_depth_seen: self.max_depth_seen(),
            depth_limit_hits: self.depth_limit_hits.load(Ordering::Relaxed),
            ngram_buffers: self.ngram_buffers.load(Ordering::Relaxed),
            scanner_errors: scanners.iter().map(|s| s.errors + s.panics).sum(),
            dedup,
            bypass,
            scanners,
            pool,
        }
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Per-scanner totals.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerStats {
    pub name: String,
    pub calls: u64,
    pub bytes: u64,
    pub nanos: u64,
    /// Calls that returned an error.
    pub errors: u64,
    /// Calls that panicked.
    pub panics: u64,
    /// Calls slower than the configured threshold.
    pub slow_calls: u64,
    pub latency: LatencyHistogram,
}

/// De-duplication totals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupStats {
    /// Distinct digests observed.
    pub unique_buffers: u64,
    /// Observations whose digest was already present.
    pub duplicate_buffers: u64,
    /// Bytes covered by duplicate observations.
    pub dup_bytes: u64,
}

/// Statistics for a scan, returned by `Engine::shutdown` and available
/// mid-scan through `Engine::stats`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub buffers_processed: u64,
    pub bytes_processed: u64,
    pub max_depth_seen: u32,
    /// Buffers rejected by the depth limit.
    pub depth_limit_hits: u64,
    /// Buffers found to be a repeating ngram.
    pub ngram_buffers: u64,
    /// Scanner calls that returned an error or panicked.
    pub scanner_errors: u64,
    pub dedup: DedupStats,
    /// Bypass counts keyed by reason; reasons never hit are omitted.
    pub bypass: BTreeMap<String, u64>,
    /// Per-scanner totals in registration order.
    pub scanners: Vec<ScannerStats>,
    pub pool: Option<PoolStats>,
}

impl ScanReport {
    /// Totals for one scanner.
    pub fn scanner(&self, name: &str) -> Option<&ScannerStats> {
        self.scanners.iter().find(|s| s.name == name)
    }

    /// Bypass count for one reason.
    pub fn bypassed(&self, reason: BypassReason) -> u64 {
        self.bypass.get(reason.as_str()).copied().unwrap_or(0)
    }
}
