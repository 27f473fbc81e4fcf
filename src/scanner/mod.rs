//! The contract between the engine and pluggable scanners.
//!
//! A scanner is registered once. During registration the engine calls
//! [`Scanner::init`] with an empty [`ScannerInfo`], and the scanner fills in
//! its name, flags, size thresholds and declared outputs. It must not
//! analyze content there. After the engine freezes its registry, every
//! dispatched buffer reaches [`Scanner::scan`] through a [`ScannerParams`]
//! that carries the buffer, the engine handle for recursion, and the
//! feature recorders.
//!
//! # Invariants
//! - `init` runs exactly once per scanner, before any `scan`.
//! - `scan` may run concurrently on many threads; scanners are `Send + Sync`
//!   and keep per-call state on the stack.
//! - A scanner error or panic never escapes dispatch: the engine records an
//!   alert naming the scanner and moves on.

pub mod recorder;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::buffer::{AddressedBuffer, ContentHints};
use crate::engine::Engine;
use crate::error::ScannerError;
use crate::path::ForensicPath;

pub use recorder::{
    Feature, FeatureRecorder, MemoryRecorder, MemoryRecorders, RecorderFactory, RecorderSet,
    TracingRecorder, ALERT_CHANNEL,
};

/// Capability and policy flags a scanner declares at init.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ScannerFlags {
    /// Only run on top-level (depth 0) buffers.
    pub depth0_only: bool,
    /// Run even on buffers that are a repeating ngram.
    pub scan_ngram_buffer: bool,
    /// Run even on content already seen in this scan.
    pub scan_seen_before: bool,
    /// The scanner decodes content and recurses into the result.
    pub recurse: bool,
    /// A recursing scanner that still wants buffers its own decoder produced.
    pub recurse_into_self: bool,
    /// Produces buffers that may be memory images.
    pub produces_memory: bool,
    /// Produces buffers that may be filesystems.
    pub produces_filesystems: bool,
    /// Only run on buffers hinted as possibly containing memory.
    pub wants_memory: bool,
    /// Only run on buffers hinted as possibly containing a filesystem.
    pub wants_filesystems: bool,
    /// Wants the raw buffers of a find (pattern search) pass.
    pub find_scanner: bool,
    /// Enabled unless a policy command disables it.
    pub default_enabled: bool,
    /// Ignored by `EnableAll` / `DisableAll`.
    pub no_all: bool,
}

impl Default for ScannerFlags {
    fn default() -> Self {
        Self {
            depth0_only: false,
            scan_ngram_buffer: false,
            scan_seen_before: false,
            recurse: false,
            recurse_into_self: false,
            produces_memory: false,
            produces_filesystems: false,
            wants_memory: false,
            wants_filesystems: false,
            find_scanner: false,
            default_enabled: true,
            no_all: false,
        }
    }
}

/// A histogram a scanner asks the (external) histogram generator to build
/// from one of its feature channels.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct HistogramDef {
    /// Histogram name.
    pub name: String,
    /// Feature channel the histogram is built from.
    pub feature: String,
    /// Extraction pattern applied to each feature (empty: whole feature).
    pub pattern: String,
    /// Only features containing this text are counted (empty: all).
    pub require: String,
    /// Output file suffix.
    pub suffix: String,
}

/// Registration metadata filled in by [`Scanner::init`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScannerInfo {
    /// Unique registry key.
    pub name: String,
    /// Decoder marker embedded in forensic paths of buffers this scanner
    /// produces. Defaults to the upper-cased name.
    pub path_prefix: String,
    pub author: String,
    pub description: String,
    pub version: String,
    pub flags: ScannerFlags,
    /// Buffers smaller than this are bypassed.
    pub min_buffer_size: usize,
    /// Buffers with fewer distinct byte values are bypassed.
    pub min_distinct_bytes: usize,
    /// Feature channels the scanner writes to.
    pub feature_names: Vec<String>,
    pub histogram_defs: Vec<HistogramDef>,
}

impl ScannerInfo {
    /// Info with only a name set.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declares a feature channel (idempotent).
    pub fn add_feature(&mut self, channel: impl Into<String>) -> &mut Self {
        let channel = channel.into();
        if !self.feature_names.contains(&channel) {
            self.feature_names.push(channel);
        }
        self
    }

    /// Declares a histogram.
    pub fn add_histogram(&mut self, def: HistogramDef) -> &mut Self {
        self.histogram_defs.push(def);
        self
    }

    /// `path_prefix`, or the upper-cased name when unset.
    pub fn effective_path_prefix(&self) -> String {
        if self.path_prefix.is_empty() {
            self.name.to_ascii_uppercase()
        } else {
            self.path_prefix.clone()
        }
    }
}

/// A pluggable analyzer.
///
/// Each lifecycle phase has its own method: `init` at registration, `scan`
/// per dispatched buffer, `shutdown` once after the pool drains.
pub trait Scanner: Send + Sync {
    /// Fills in registration metadata. Called once, before any scan.
    fn init(&self, info: &mut ScannerInfo);

    /// Analyzes `params.buffer()`. May record features and recurse into
    /// derived buffers through [`ScannerParams::recurse`].
    fn scan(&self, params: &ScannerParams<'_>) -> Result<(), ScannerError>;

    /// Called once for each enabled scanner after the pool is drained.
    fn shutdown(&self, _engine: &Engine) {}
}

/// Adapts a closure into a [`Scanner`].
///
/// ```
/// use forensic_scanner::{ScannerFn, ScannerParams};
///
/// let scanner = ScannerFn::new("nul", |p: &ScannerParams<'_>| {
///     if let Some(off) = p.buffer().find_byte(0, 0) {
///         p.record("nul", &(p.buffer().pos0() + off as u64), "NUL", "")?;
///     }
///     Ok(())
/// })
/// .configure(|info| {
///     info.add_feature("nul");
/// });
/// # let _ = scanner;
/// ```
pub struct ScannerFn<F> {
    info: ScannerInfo,
    scan: F,
}

impl<F> ScannerFn<F>
where
    F: Fn(&ScannerParams<'_>) -> Result<(), ScannerError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, scan: F) -> Self {
        Self {
            info: ScannerInfo::named(name),
            scan,
        }
    }

    /// Adjusts the metadata reported at init.
    pub fn configure(mut self, f: impl FnOnce(&mut ScannerInfo)) -> Self {
        f(&mut self.info);
        self
    }
}

impl<F> Scanner for ScannerFn<F>
where
    F: Fn(&ScannerParams<'_>) -> Result<(), ScannerError> + Send + Sync,
{
    fn init(&self, info: &mut ScannerInfo) {
        *info = self.info.clone();
    }

    fn scan(&self, params: &ScannerParams<'_>) -> Result<(), ScannerError> {
        (self.scan)(params)
    }
}

impl<F> fmt::Debug for ScannerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScannerFn")
            .field("name", &self.info.name)
            .finish_non_exhaustive()
    }
}

/// Per-call context handed to [`Scanner::scan`].
pub struct ScannerParams<'a> {
    pub(crate) buffer: &'a AddressedBuffer,
    pub(crate) engine: &'a Engine,
    pub(crate) info: &'a ScannerInfo,
    pub(crate) recorders: &'a RecorderSet,
    pub(crate) sidecar: Option<&'a Arc<dyn FeatureRecorder>>,
}

impl<'a> ScannerParams<'a> {
    /// The buffer being scanned.
    #[inline]
    pub fn buffer(&self) -> &'a AddressedBuffer {
        self.buffer
    }

    /// The engine running this scan.
    #[inline]
    pub fn engine(&self) -> &'a Engine {
        self.engine
    }

    /// The info of the scanner being called.
    #[inline]
    pub fn info(&self) -> &'a ScannerInfo {
        self.info
    }

    #[inline]
    pub fn recorders(&self) -> &'a RecorderSet {
        self.recorders
    }

    /// Recorder for `channel`.
    pub fn recorder(&self, channel: &str) -> Result<&'a Arc<dyn FeatureRecorder>, ScannerError> {
        self.recorders
            .get(channel)
            .ok_or_else(|| ScannerError::UnknownRecorder(channel.to_string()))
    }

    /// Writes one feature to `channel`.
    pub fn record(
        &self,
        channel: &str,
        pos: &ForensicPath,
        feature: &str,
        context: &str,
    ) -> Result<(), ScannerError> {
        self.recorder(channel)?.write(pos, feature, context);
        Ok(())
    }

    /// Optional print sink attached by the driver for this top-level buffer.
    #[inline]
    pub fn sidecar(&self) -> Option<&'a Arc<dyn FeatureRecorder>> {
        self.sidecar
    }

    /// Hands a derived buffer back to the engine.
    ///
    /// The buffer is processed inline or queued per the engine's scheduling
    /// rules; the sidecar, if any, follows it. A scanner flagged
    /// `produces_memory` or `produces_filesystems` marks the buffer with the
    /// matching [`ContentHints`].
    pub fn recurse(&self, buffer: AddressedBuffer) -> Result<(), ScannerError> {
        let flags = &self.info.flags;
        let mut hints = ContentHints::NONE;
        if flags.produces_memory {
            hints = hints.union(ContentHints::MEMORY);
        }
        if flags.produces_filesystems {
            hints = hints.union(ContentHints::FILESYSTEM);
        }
        if !hints.is_empty() {
            buffer.add_hints(hints);
        }
        self.engine
            .process_derived(buffer, self.sidecar.cloned())
            .map_err(ScannerError::from)
    }

    /// Downcasts an opaque per-engine context registered with
    /// `Engine::set_context`.
    pub fn context<T: Any + Send + Sync>(&self) -> Option<&'a T> {
        self.engine.context::<T>()
    }
}

impl fmt::Debug for ScannerParams<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScannerParams")
            .field("scanner", &self.info.name)
            .field("pos0", self.buffer.pos0())
            .finish_non_exhaustive()
    }
}
