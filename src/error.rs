//! Error types for the scanning core.
//!
//! Errors are split by failure domain so each caller sees only what it can
//! actually hit:
//!
//! | Type | Raised by | Policy |
//! |------|-----------|--------|
//! | [`BufferError`] | buffer reads, slicing, mapping | always propagated |
//! | [`RegistrationError`] | scanner registration and policy commands | fatal at setup |
//! | [`PhaseError`] | any engine call made in the wrong lifecycle state | fatal (driver bug) |
//! | [`ConfigError`] | [`EngineConfig::validate`](crate::EngineConfig::validate) | fatal at setup |
//! | [`ScannerError`] | a scanner body | recovered by the engine, never aborts a scan |
//!
//! [`EngineError`] wraps the fatal classes for driver code that wants a
//! single `?`-able type.

use std::io;

use thiserror::Error;

use crate::engine::Phase;

/// Errors from buffer access and construction.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BufferError {
    /// A read or slice would cross the end of the buffer.
    ///
    /// Never truncated silently: a short read is a bug in the caller's
    /// parsing logic and must surface.
    #[error("range error: offset {offset} + length {len} exceeds buffer size {size}")]
    Range { offset: usize, len: usize, size: usize },

    /// The buffer is shared (other references or live children) and cannot
    /// be reopened for writing.
    #[error("buffer is shared: {references} references, {children} live children")]
    Shared { references: usize, children: usize },

    /// The buffer already produced cached analyses (hash, histogram, ngram)
    /// and cannot be resized in place.
    #[error("buffer already produced cached analyses and is frozen")]
    Frozen,

    /// The buffer does not own heap memory (mapped, external, or borrowed).
    #[error("buffer does not own heap memory")]
    NotOwned,

    /// File open or mapping failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BufferError {
    /// Builds a range error for an access of `len` bytes at `offset`.
    #[inline]
    pub(crate) fn range(offset: usize, len: usize, size: usize) -> Self {
        Self::Range { offset, len, size }
    }
}

/// Errors raised while registering scanners or applying enable/disable
/// commands.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum RegistrationError {
    /// The scanner's Init call left `ScannerInfo::name` empty.
    #[error("scanner did not supply a name during init")]
    EmptyName,

    /// Another scanner already registered under this name.
    #[error("scanner name '{0}' is already registered")]
    Duplicate(String),

    /// The scanner's path prefix cannot be embedded in a forensic path.
    #[error("scanner '{name}' has invalid path prefix '{prefix}'")]
    InvalidPrefix { name: String, prefix: String },

    /// An enable/disable command names a scanner that was never registered.
    #[error("unknown scanner '{0}'")]
    UnknownScanner(String),

    /// Registration would exceed the addressable scanner count.
    #[error("too many scanners registered (max {max})")]
    TooManyScanners { max: usize },
}

/// An engine operation was invoked in a lifecycle state where it is illegal.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{operation} is illegal in phase {actual:?} (expected {expected:?})")]
pub struct PhaseError {
    /// Name of the rejected operation.
    pub operation: &'static str,
    /// Phase the operation requires.
    pub expected: Phase,
    /// Phase the engine was in.
    pub actual: Phase,
}

/// Validation error returned by
/// [`EngineConfig::validate`](crate::EngineConfig::validate).
///
/// Each variant names the violated constraint. Treat it as a configuration
/// bug, not as hostile input.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("max_depth must be > 0")]
    MaxDepthZero,
    #[error("max_ngram must be >= 2 (got {0})")]
    MaxNgramTooSmall(usize),
    #[error("dedup_shards must be a non-zero power of two (got {0})")]
    DedupShardsNotPowerOfTwo(usize),
    #[error("join_poll_interval must be > 0")]
    JoinPollIntervalZero,
}

/// Failure reported by a scanner body.
///
/// The engine never propagates these: they are written to the alert channel
/// with the scanner name and buffer address, and dispatch moves on.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScannerError {
    /// A buffer access inside the scanner failed.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// Recursion into the engine failed (e.g. the engine is shutting down).
    #[error(transparent)]
    Phase(#[from] PhaseError),

    /// I/O performed by the scanner failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The scanner wrote to a feature channel it never declared.
    #[error("no feature recorder named '{0}'")]
    UnknownRecorder(String),

    /// Free-form failure description.
    #[error("{0}")]
    Failed(String),
}

impl ScannerError {
    /// Builds a free-form scanner failure.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Fatal errors surfaced to driver code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error("registration error: {0}")]
    Registration(#[from] RegistrationError),

    #[error("phase error: {0}")]
    Phase(#[from] PhaseError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// Worker threads could not be started.
    #[error("failed to start worker threads: {0}")]
    Spawn(#[from] io::Error),
}
