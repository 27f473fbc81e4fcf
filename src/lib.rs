//! Recursive forensic buffer scanning core with explicit provenance.
//!
//! ## Scope
//! This crate is the execution core of a feature-extraction engine: it runs a
//! set of pluggable scanners over arbitrarily large binary inputs, lets
//! scanners hand decoded sub-streams back for scanning, and records where
//! every byte came from. Product scanners and persistent output formats are
//! supplied by callers.
//!
//! ## Key invariants
//! - Every buffer carries a [`ForensicPath`]: the decoder chain and offsets
//!   that lead to its first byte.
//! - Buffer reads are bounds-checked; zero-copy slices keep their parent
//!   alive and are counted on it.
//! - Recursion is bounded by `max_depth`; a buffer at the limit produces one
//!   alert and is never scanned.
//! - Repeated content is detected with one atomic check-and-increment per
//!   digest; scanners that do not tolerate duplicates run on it once.
//! - A failing or panicking scanner produces an alert and never aborts the
//!   scan.
//!
//! ## Engine flow (one buffer)
//! 1) Schedule: inline (small recursive, borrowed, or single-threaded) or
//!    queued to the worker pool.
//! 2) Survey: depth check, content digest and dedup verdict, ngram size.
//! 3) Dispatch: each scanner in registration order, unless a bypass
//!    predicate applies.
//! 4) Scanners record features and may call `params.recurse(derived)`.
//!
//! ## Notable entry points
//! - [`Engine`] / [`EngineConfig`]: registry, policy, scanning, shutdown.
//! - [`AddressedBuffer`] / [`MutableBuffer`]: buffer model.
//! - [`Scanner`] / [`ScannerFn`] / [`ScannerParams`]: the scanner contract.
//! - [`FeatureRecorder`] / [`RecorderSet`]: output channels.
//! - [`ThreadPool`]: the worker pool the engine runs on.
//!
//! ## Example
//! ```
//! use forensic_scanner::{
//!     AddressedBuffer, Engine, EngineConfig, ForensicPath, MemoryRecorders, ScannerFn,
//!     ScannerParams,
//! };
//! use std::sync::Arc;
//!
//! let recorders = Arc::new(MemoryRecorders::new());
//! let engine = Engine::with_recorders(EngineConfig::single_threaded(), recorders.clone())?;
//! engine.register(
//!     ScannerFn::new("hello", |p: &ScannerParams<'_>| {
//!         if let Some(off) = p.buffer().find(b"Hello", 0) {
//!             p.record("hello", &(p.buffer().pos0() + off as u64), "Hello", "")?;
//!         }
//!         Ok(())
//!     })
//!     .configure(|info| {
//!         info.add_feature("hello");
//!     }),
//! )?;
//! engine.apply_enable_disable_policy(&[])?;
//! engine.start_scan()?;
//! engine.process(AddressedBuffer::from_vec(
//!     ForensicPath::from_offset(0),
//!     b"Hello World!\n".to_vec(),
//! ))?;
//! let report = engine.shutdown()?;
//!
//! assert_eq!(recorders.features("hello").len(), 1);
//! assert_eq!(report.buffers_processed, 1);
//! # Ok::<(), forensic_scanner::EngineError>(())
//! ```

pub mod buffer;
pub mod engine;
pub mod error;
pub mod path;
pub mod pool;
pub mod scanner;

pub use buffer::{
    AddressedBuffer, ByteHistogram, ContentHints, Digest, HashAlgorithm, MutableBuffer, Ownership,
};
pub use engine::{
    BypassReason, DebugFlags, DedupStats, Engine, EngineConfig, LatencyHistogram, Phase,
    ScanReport, ScannerCommand, ScannerStats, MAX_DEPTH_ALERT,
};
pub use error::{
    BufferError, ConfigError, EngineError, PhaseError, RegistrationError, ScannerError,
};
pub use path::{ForensicPath, PathParseError};
pub use pool::{PoolStats, ThreadPool};
pub use scanner::{
    Feature, FeatureRecorder, HistogramDef, MemoryRecorder, MemoryRecorders, RecorderFactory,
    RecorderSet, Scanner, ScannerFlags, ScannerFn, ScannerInfo, ScannerParams, TracingRecorder,
    ALERT_CHANNEL,
};
