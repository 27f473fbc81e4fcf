//! Scanner registry, lifecycle, and recursive dispatch.
//!
//! # Lifecycle
//!
//! ```text
//!   Configuring ──apply_enable_disable_policy──► Initialized ──start_scan──► Scanning
//!   (register)                                   (registry frozen)            (process)
//!                                                                                │
//!   Cleaned ◄──────────────── ShuttingDown ◄─────────────── shutdown ────────────┘
//!            scanner shutdown hooks          pool drained and joined
//! ```
//!
//! Every operation checks the phase and fails with [`PhaseError`] when
//! called out of order. Recursive submissions from scanners are also
//! accepted while shutting down, so work produced during the final drain
//! is not lost.
//!
//! # Invariants
//! - After configuration the registry is immutable and read without locks
//!   (`OnceLock`).
//! - Scanners are dispatched in registration order for each buffer.
//! - A buffer whose depth reaches `max_depth` is never passed to a scanner;
//!   exactly one alert is written for it.
//! - The seen-before verdict for a digest is decided by one atomic
//!   check-and-increment, so N identical buffers yield exactly one "new".
//!
//! # Ownership
//! The engine owns the thread pool. The pool's callback holds a `Weak`
//! reference back, so dropping the last `Arc<Engine>` tears everything down.

mod config;
mod dedup;
mod dispatch;
mod policy;
mod stats;


use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use ahash::AHashMap;
use tracing::{debug, info, warn};

use crate::buffer::AddressedBuffer;
use crate::error::{EngineError, PhaseError, RegistrationError};
use crate::path::{is_valid_decoder_name, ForensicPath};
use crate::pool::ThreadPool;
use crate::scanner::{
    FeatureRecorder, HistogramDef, RecorderFactory, RecorderSet, Scanner, ScannerInfo,
    TracingRecorder,
};

pub use config::{
    DebugFlags, EngineConfig, DEFAULT_MAX_DEPTH, DEFAULT_MAX_NGRAM, DEFAULT_SAME_THREAD_MAX,
};
pub use policy::ScannerCommand;
pub use stats::{BypassReason, DedupStats, LatencyHistogram, ScanReport, ScannerStats};

use dedup::SeenTable;
use dispatch::{panic_message, WorkUnit};
use stats::EngineCounters;

/// Upper bound on registered scanners.
pub const MAX_SCANNERS: usize = 1024;

/// Alert feature written when a buffer hits the depth limit.
pub const MAX_DEPTH_ALERT: &str = "process_extract: MAX DEPTH REACHED";

/// Engine lifecycle phase.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Configuring = 0,
    Initialized = 1,
    Scanning = 2,
    ShuttingDown = 3,
    Cleaned = 4,
}

impl Phase {
    fn from_u8(v: u8) -> Phase {
        match v {
            0 => Phase::Configuring,
            1 => Phase::Initialized,
            2 => Phase::Scanning,
            3 => Phase::ShuttingDown,
            _ => Phase::Cleaned,
        }
    }
}

struct Registered {
    scanner: Arc<dyn Scanner>,
    info: ScannerInfo,
}

/// Frozen registry built by `apply_enable_disable_policy`.
struct Registry {
    scanners: Vec<Registered>,
    enabled: Vec<bool>,
    by_name: AHashMap<String, usize>,
    recorders: RecorderSet,
    counters: EngineCounters,
    context: Option<Box<dyn Any + Send + Sync>>,
}

impl Registry {
    fn index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    fn enabled_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.enabled
            .iter()
            .enumerate()
            .filter_map(|(i, &on)| on.then_some(i))
    }
}

/// State that only exists while configuring.
#[derive(Default)]
struct Pending {
    scanners: Vec<Registered>,
    context: Option<Box<dyn Any + Send + Sync>>,
}

/// The scanning engine.
///
/// Created with [`Engine::new`] (or [`Engine::with_recorders`]) and always
/// held in an `Arc`.
pub struct Engine {
    config: EngineConfig,
    phase: AtomicU8,
    pending: Mutex<Pending>,
    registry: OnceLock<Registry>,
    seen: SeenTable,
    pool: OnceLock<ThreadPool<WorkUnit>>,
    factory: Arc<dyn RecorderFactory>,
    this: Weak<Engine>,
}

impl Engine {
    /// Creates an engine whose feature channels log through `tracing`.
    pub fn new(config: EngineConfig) -> Result<Arc<Engine>, EngineError> {
        Self::with_recorders(config, Arc::new(TracingRecorder::factory()))
    }

    /// Creates an engine whose feature channels come from `factory`.
    pub fn with_recorders(
        config: EngineConfig,
        factory: Arc<dyn RecorderFactory>,
    ) -> Result<Arc<Engine>, EngineError> {
        config.validate()?;
        let seen = SeenTable::new(config.dedup_shards);
        Ok(Arc::new_cyclic(|this| Engine {
            config,
            phase: AtomicU8::new(Phase::Configuring as u8),
            pending: Mutex::new(Pending::default()),
            registry: OnceLock::new(),
            seen,
            pool: OnceLock::new(),
            factory,
            this: this.clone(),
        }))
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn expect_phase(&self, operation: &'static str, expected: Phase) -> Result<(), PhaseError> {
        let actual = self.phase();
        if actual == expected {
            Ok(())
        } else {
            Err(PhaseError {
                operation,
                expected,
                actual,
            })
        }
    }

    fn transition(&self, operation: &'static str, from: Phase, to: Phase) -> Result<(), PhaseError> {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| PhaseError {
                operation,
                expected: from,
                actual: Phase::from_u8(actual),
            })?;
        debug!(?from, ?to, "engine phase change");
        Ok(())
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Pending> {
        self.pending.lock().expect("pending registry poisoned")
    }

    // --------------------------
    // Configuration
    // --------------------------

    /// Registers a scanner. See [`register_arc`](Self::register_arc).
    pub fn register<S: Scanner + 'static>(&self, scanner: S) -> Result<(), EngineError> {
        self.register_arc(Arc::new(scanner))
    }

    /// Registers a shared scanner, running its `init` once to collect its
    /// [`ScannerInfo`].
    ///
    /// Fails when not configuring, when the scanner supplies no name, a
    /// name already taken, or a path prefix that cannot be embedded in a
    /// forensic path.
    ///
    /// `init` runs outside the registry lock.
    pub fn register_arc(&self, scanner: Arc<dyn Scanner>) -> Result<(), EngineError> {
        self.expect_phase("register", Phase::Configuring)?;
        let mut info = ScannerInfo::default();
        scanner.init(&mut info);

        let mut pending = self.lock_pending();
        self.expect_phase("register", Phase::Configuring)?;

        if info.name.is_empty() {
            return Err(RegistrationError::EmptyName.into());
        }
        if pending.scanners.iter().any(|r| r.info.name == info.name) {
            return Err(RegistrationError::Duplicate(info.name).into());
        }
        if pending.scanners.len() >= MAX_SCANNERS {
            return Err(RegistrationError::TooManyScanners { max: MAX_SCANNERS }.into());
        }
        let prefix = info.effective_path_prefix();
        if !is_valid_decoder_name(&prefix) {
            return Err(RegistrationError::InvalidPrefix {
                name: info.name,
                prefix,
            }
            .into());
        }
        info.path_prefix = prefix;

        debug!(scanner = %info.name, prefix = %info.path_prefix, "registered scanner");
        pending.scanners.push(Registered { scanner, info });
        Ok(())
    }

    /// Attaches an opaque value scanners can read through
    /// [`ScannerParams::context`](crate::ScannerParams::context). Replaces
    /// any earlier value.
    pub fn set_context<T: Any + Send + Sync>(&self, value: T) -> Result<(), EngineError> {
        let mut pending = self.lock_pending();
        self.expect_phase("set_context", Phase::Configuring)?;
        pending.context = Some(Box::new(value));
        Ok(())
    }

    /// Resolves which scanners run, freezes the registry, creates the
    /// recorders for every declared feature channel, and moves to
    /// [`Phase::Initialized`]. Legal exactly once.
    pub fn apply_enable_disable_policy(&self, commands: &[ScannerCommand]) -> Result<(), EngineError> {
        let mut pending = self.lock_pending();
        self.expect_phase("apply_enable_disable_policy", Phase::Configuring)?;

        let infos: Vec<&ScannerInfo> = pending.scanners.iter().map(|r| &r.info).collect();
        let enabled = policy::resolve(&infos, commands)?;

        let Pending { scanners, context } = std::mem::take(&mut *pending);
        let channels: Vec<&str> = scanners
            .iter()
            .zip(&enabled)
            .filter(|(_, &on)| on)
            .flat_map(|(r, _)| r.info.feature_names.iter().map(String::as_str))
            .collect();
        let recorders = RecorderSet::build(self.factory.as_ref(), channels);
        let by_name = scanners
            .iter()
            .enumerate()
            .map(|(i, r)| (r.info.name.clone(), i))
            .collect();
        let registry = Registry {
            counters: EngineCounters::new(scanners.len()),
            scanners,
            enabled,
            by_name,
            recorders,
            context,
        };
        let enabled_count = registry.enabled.iter().filter(|&&on| on).count();
        let total = registry.scanners.len();
        if self.registry.set(registry).is_err() {
            // The pending lock and phase check make a second freeze impossible.
            return Err(PhaseError {
                operation: "apply_enable_disable_policy",
                expected: Phase::Configuring,
                actual: self.phase(),
            }
            .into());
        }
        self.transition(
            "apply_enable_disable_policy",
            Phase::Configuring,
            Phase::Initialized,
        )?;
        info!(enabled = enabled_count, registered = total, "scanner policy applied");
        Ok(())
    }

    /// Starts the worker pool (unless single-threaded) and moves to
    /// [`Phase::Scanning`].
    pub fn start_scan(&self) -> Result<(), EngineError> {
        self.expect_phase("start_scan", Phase::Initialized)?;
        if !self.config.is_single_threaded() && self.pool.get().is_none() {
            let weak = self.this.clone();
            let pool = ThreadPool::new(
                self.config.threads,
                "scan-worker",
                self.config.join_poll_interval,
                move |unit: WorkUnit| {
                    if let Some(engine) = weak.upgrade() {
                        engine.run_unit(unit);
                    }
                },
            )?;
            // start_scan is the only writer and runs before Scanning.
            let _ = self.pool.set(pool);
        }
        self.transition("start_scan", Phase::Initialized, Phase::Scanning)?;
        info!(
            threads = if self.pool.get().is_some() { self.config.threads } else { 0 },
            max_depth = self.config.max_depth,
            hash = self.config.hash_algorithm.name(),
            "scan started"
        );
        Ok(())
    }

    // --------------------------
    // Scanning
    // --------------------------

    /// Submits a top-level (or any driver-produced) buffer for scanning.
    ///
    /// The buffer is processed on the calling thread or queued for the pool
    /// per the engine's scheduling rules.
    pub fn process(&self, buffer: AddressedBuffer) -> Result<(), PhaseError> {
        self.expect_phase("process", Phase::Scanning)?;
        self.schedule(buffer, None)
    }

    /// Like [`process`](Self::process), attaching a print sink that every
    /// scanner call on this buffer (and on buffers derived from it) can
    /// reach through [`ScannerParams::sidecar`](crate::ScannerParams::sidecar).
    pub fn process_with_sidecar(
        &self,
        buffer: AddressedBuffer,
        sidecar: Arc<dyn FeatureRecorder>,
    ) -> Result<(), PhaseError> {
        self.expect_phase("process", Phase::Scanning)?;
        self.schedule(buffer, Some(sidecar))
    }

    /// Entry point for buffers produced by scanners.
    pub(crate) fn process_derived(
        &self,
        buffer: AddressedBuffer,
        sidecar: Option<Arc<dyn FeatureRecorder>>,
    ) -> Result<(), PhaseError> {
        match self.phase() {
            Phase::Scanning | Phase::ShuttingDown => self.schedule(buffer, sidecar),
            actual => Err(PhaseError {
                operation: "process",
                expected: Phase::Scanning,
                actual,
            }),
        }
    }

    /// Drains and joins the pool, runs every enabled scanner's shutdown
    /// hook, flushes the recorders, and returns the final report.
    pub fn shutdown(&self) -> Result<ScanReport, EngineError> {
        self.transition("shutdown", Phase::Scanning, Phase::ShuttingDown)?;
        if let Some(pool) = self.pool.get() {
            pool.join();
        }
        if let Some(reg) = self.registry.get() {
            for i in reg.enabled_indices() {
                let r = &reg.scanners[i];
                let hook = panic::catch_unwind(AssertUnwindSafe(|| r.scanner.shutdown(self)));
                if let Err(payload) = hook {
                    let msg = panic_message(payload.as_ref());
                    warn!(scanner = %r.info.name, error = %msg, "scanner shutdown hook panicked");
                    reg.recorders.write_alert(
                        &ForensicPath::default(),
                        &format!("scanner={}", r.info.name),
                        &format!("<shutdown>{msg}</shutdown>"),
                    );
                }
            }
            reg.recorders.flush_all();
        }
        let report = self.stats();
        self.transition("shutdown", Phase::ShuttingDown, Phase::Cleaned)?;
        info!(
            buffers = report.buffers_processed,
            bytes = report.bytes_processed,
            max_depth = report.max_depth_seen,
            dup_bytes = report.dedup.dup_bytes,
            scanner_errors = report.scanner_errors,
            "scan finished"
        );
        Ok(report)
    }

    // --------------------------
    // Queries
    // --------------------------

    /// Registered scanner names in registration order.
    pub fn scanner_names(&self) -> Vec<String> {
        match self.registry.get() {
            Some(reg) => reg.scanners.iter().map(|r| r.info.name.clone()).collect(),
            None => self
                .lock_pending()
                .scanners
                .iter()
                .map(|r| r.info.name.clone())
                .collect(),
        }
    }

    /// Enabled scanner names in registration order (empty until the policy
    /// is applied).
    pub fn enabled_scanner_names(&self) -> Vec<String> {
        self.registry
            .get()
            .map(|reg| {
                reg.enabled_indices()
                    .map(|i| reg.scanners[i].info.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_scanner_enabled(&self, name: &str) -> bool {
        self.registry
            .get()
            .and_then(|reg| reg.index(name).map(|i| reg.enabled[i]))
            .unwrap_or(false)
    }

    /// Registration metadata of `name`, as completed by the engine.
    pub fn scanner_info(&self, name: &str) -> Option<ScannerInfo> {
        match self.registry.get() {
            Some(reg) => reg.index(name).map(|i| reg.scanners[i].info.clone()),
            None => self
                .lock_pending()
                .scanners
                .iter()
                .find(|r| r.info.name == name)
                .map(|r| r.info.clone()),
        }
    }

    /// Enabled scanners that want raw find buffers.
    pub fn find_scanners(&self) -> Vec<String> {
        self.registry
            .get()
            .map(|reg| {
                reg.enabled_indices()
                    .filter(|&i| reg.scanners[i].info.flags.find_scanner)
                    .map(|i| reg.scanners[i].info.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Histograms declared by enabled scanners.
    pub fn histogram_defs(&self) -> Vec<HistogramDef> {
        self.registry
            .get()
            .map(|reg| {
                reg.enabled_indices()
                    .flat_map(|i| reg.scanners[i].info.histogram_defs.iter().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The recorders of this scan (available once the policy is applied).
    pub fn recorders(&self) -> Option<&RecorderSet> {
        self.registry.get().map(|reg| &reg.recorders)
    }

    /// Context attached with [`set_context`](Self::set_context), if it has
    /// type `T`.
    pub fn context<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.registry
            .get()?
            .context
            .as_ref()?
            .downcast_ref::<T>()
    }

    /// Deepest buffer dispatched so far.
    pub fn max_depth_seen(&self) -> u32 {
        self.registry
            .get()
            .map(|reg| reg.counters.max_depth_seen())
            .unwrap_or(0)
    }

    /// Bytes of buffers that were seen before.
    pub fn dup_bytes(&self) -> u64 {
        self.seen.dup_bytes()
    }

    /// Current statistics. Exact once the scan is shut down.
    pub fn stats(&self) -> ScanReport {
        let dedup = DedupStats {
            unique_buffers: self.seen.unique() as u64,
            duplicate_buffers: self.seen.duplicates(),
            dup_bytes: self.seen.dup_bytes(),
        };
        let pool = self.pool.get().map(ThreadPool::stats);
        match self.registry.get() {
            Some(reg) => reg.counters.snapshot(
                reg.scanners.iter().map(|r| r.info.name.as_str()),
                dedup,
                pool,
            ),
            None => ScanReport {
                dedup,
                pool,
                ..ScanReport::default()
            },
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("phase", &self.phase())
            .field("scanners", &self.scanner_names())
            .field("threads", &self.pool.get().map(ThreadPool::threads))
            .finish_non_exhaustive()
    }
}
