//! Scheduling and per-buffer dispatch.
//!
//! # Algorithm
//!
//! For each buffer:
//! 1. **Schedule**: run inline when threading is off, when the buffer is a
//!    small recursive buffer, or when it borrows from a parent; otherwise
//!    queue it (one unit per enabled scanner when fanning out a top-level
//!    buffer).
//! 2. **Survey** (once per buffer): depth check, dedup verdict, ngram size.
//! 3. **Dispatch**: for each scanner in registration order, evaluate the
//!    bypass predicates, then call the scanner with timing and isolation.
//!
//! A scanner error or panic becomes one alert (`scanner=<name>`) and one
//! error count; dispatch continues with the next scanner.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, trace, warn};

use crate::buffer::{AddressedBuffer, ContentHints};
use crate::error::PhaseError;
use crate::scanner::{FeatureRecorder, ScannerParams};

use super::stats::BypassReason;
use super::{Engine, Phase, Registry, MAX_DEPTH_ALERT};

/// Logs a dispatch step at `info` when step tracing is on, else at `trace`.
macro_rules! step {
    ($engine:expr, $($arg:tt)+) => {
        if $engine.config.debug.trace_steps {
            info!($($arg)+)
        } else {
            trace!($($arg)+)
        }
    };
}

/// Per-buffer facts computed once before any scanner runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Survey {
    pub(crate) seen_before: bool,
    pub(crate) ngram: usize,
}

/// What a queued unit should run.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Target {
    /// Survey the buffer and run every scanner.
    All,
    /// Run one scanner with a precomputed survey.
    One { index: usize, survey: Survey },
}

/// A buffer queued for the pool.
pub(crate) struct WorkUnit {
    pub(crate) buffer: AddressedBuffer,
    pub(crate) target: Target,
    pub(crate) sidecar: Option<Arc<dyn FeatureRecorder>>,
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

impl Engine {
    fn frozen_registry(&self, operation: &'static str) -> Result<&Registry, PhaseError> {
        self.registry.get().ok_or(PhaseError {
            operation,
            expected: Phase::Initialized,
            actual: self.phase(),
        })
    }

    /// Decides where `buffer` runs and either processes it now or queues it.
    pub(super) fn schedule(
        &self,
        buffer: AddressedBuffer,
        sidecar: Option<Arc<dyn FeatureRecorder>>,
    ) -> Result<(), PhaseError> {
        let reg = self.frozen_registry("process")?;
        let depth = buffer.depth();

        let pool = match self.pool.get() {
            Some(pool) if !self.config.is_single_threaded() => pool,
            _ => {
                self.process_now(reg, &buffer, sidecar.as_ref());
                return Ok(());
            }
        };
        if (depth > 0 && buffer.len() < self.config.same_thread_max) || buffer.is_borrowed() {
            step!(self, pos = %buffer.pos0(), len = buffer.len(), "processing inline");
            self.process_now(reg, &buffer, sidecar.as_ref());
            return Ok(());
        }

        if self.config.fanout && depth == 0 {
            let Some(survey) = self.survey(reg, &buffer) else {
                return Ok(());
            };
            for index in reg.enabled_indices() {
                let unit = WorkUnit {
                    buffer: buffer.clone(),
                    target: Target::One { index, survey },
                    sidecar: sidecar.clone(),
                };
                if let Err(unit) = pool.submit(unit) {
                    self.run_unit(unit);
                }
            }
            return Ok(());
        }

        let unit = WorkUnit {
            buffer,
            target: Target::All,
            sidecar,
        };
        if let Err(unit) = pool.submit(unit) {
            // Pool already closed: finish the work here.
            self.run_unit(unit);
        }
        Ok(())
    }

    /// Pool callback.
    pub(super) fn run_unit(&self, unit: WorkUnit) {
        let Some(reg) = self.registry.get() else {
            return;
        };
        match unit.target {
            Target::All => self.process_now(reg, &unit.buffer, unit.sidecar.as_ref()),
            Target::One { index, survey } => {
                self.dispatch_one(reg, index, &unit.buffer, survey, unit.sidecar.as_ref())
            }
        }
    }

    fn process_now(
        &self,
        reg: &Registry,
        buffer: &AddressedBuffer,
        sidecar: Option<&Arc<dyn FeatureRecorder>>,
    ) {
        let Some(survey) = self.survey(reg, buffer) else {
            return;
        };
        for index in 0..reg.scanners.len() {
            self.dispatch_one(reg, index, buffer, survey, sidecar);
        }
    }

    /// Depth check, dedup and ngram analysis. `None` when the buffer is
    /// too deep to scan.
    fn survey(&self, reg: &Registry, buffer: &AddressedBuffer) -> Option<Survey> {
        let depth = buffer.depth();
        if depth >= self.config.max_depth {
            reg.counters.record_depth_limit();
            reg.recorders.write_alert(buffer.pos0(), MAX_DEPTH_ALERT, "");
            return None;
        }
        reg.counters.record_buffer(buffer.len(), depth);

        if self.config.debug.dump_buffers {
            info!(pos = %buffer.pos0(), len = buffer.len(), "buffer dump\n{}", buffer.hex_dump(256));
        }

        let seen_before = if self.config.debug.disable_dedup {
            false
        } else {
            let digest = buffer.digest(self.config.hash_algorithm);
            self.seen.observe(&digest, buffer.len()) > 0
        };
        let ngram = if self.config.debug.disable_ngram_bypass {
            0
        } else {
            buffer.repeating_ngram_size(self.config.max_ngram)
        };
        if ngram > 0 {
            reg.counters.record_ngram_buffer();
        }
        step!(self, pos = %buffer.pos0(), len = buffer.len(), depth, seen_before, ngram, "surveyed buffer");
        Some(Survey { seen_before, ngram })
    }

    /// First bypass predicate that applies to scanner `index`, in order.
    fn bypass_reason(
        &self,
        reg: &Registry,
        index: usize,
        buffer: &AddressedBuffer,
        survey: Survey,
    ) -> Option<BypassReason> {
        let info = &reg.scanners[index].info;
        let flags = &info.flags;
        if !reg.enabled[index] {
            return Some(BypassReason::Disabled);
        }
        if buffer.len() < info.min_buffer_size {
            return Some(BypassReason::TooSmall);
        }
        if buffer.depth() > 0 && flags.depth0_only {
            return Some(BypassReason::DepthZeroOnly);
        }
        if survey.seen_before && !flags.scan_seen_before {
            return Some(BypassReason::SeenBefore);
        }
        if survey.ngram > 0 && !flags.scan_ngram_buffer {
            return Some(BypassReason::RepeatingNgram);
        }
        if info.min_distinct_bytes > 0 && buffer.histogram().distinct() < info.min_distinct_bytes {
            return Some(BypassReason::TooFewDistinctBytes);
        }
        if flags.recurse
            && !flags.recurse_into_self
            && buffer.pos0().contains_decoder(&info.path_prefix)
        {
            return Some(BypassReason::SelfRecursion);
        }
        if flags.wants_memory && !buffer.hints().contains(ContentHints::MEMORY) {
            return Some(BypassReason::NoMemoryHint);
        }
        if flags.wants_filesystems && !buffer.hints().contains(ContentHints::FILESYSTEM) {
            return Some(BypassReason::NoFilesystemHint);
        }
        None
    }

    /// Runs scanner `index` on `buffer` unless bypassed, containing errors
    /// and panics.
    fn dispatch_one(
        &self,
        reg: &Registry,
        index: usize,
        buffer: &AddressedBuffer,
        survey: Survey,
        sidecar: Option<&Arc<dyn FeatureRecorder>>,
    ) {
        let entry = &reg.scanners[index];
        let name = entry.info.name.as_str();
        if let Some(reason) = self.bypass_reason(reg, index, buffer, survey) {
            reg.counters.record_bypass(reason);
            step!(self, scanner = name, pos = %buffer.pos0(), reason = reason.as_str(), "bypassed");
            return;
        }

        let params = ScannerParams {
            buffer,
            engine: self,
            info: &entry.info,
            recorders: &reg.recorders,
            sidecar,
        };
        step!(self, scanner = name, pos = %buffer.pos0(), len = buffer.len(), "calling scanner");
        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| entry.scanner.scan(&params)));
        let elapsed = start.elapsed();

        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        let slow = elapsed >= self.config.slow_scanner_threshold;
        let counters = reg.counters.scanner(index);
        counters.record_call(buffer.len(), nanos, slow);
        if slow {
            warn!(
                scanner = name,
                pos = %buffer.pos0(),
                elapsed_ms = elapsed.as_millis() as u64,
                "slow scanner call"
            );
        }

        let message = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => {
                counters.record_error();
                err.to_string()
            }
            Err(payload) => {
                counters.record_panic();
                panic_message(payload.as_ref())
            }
        };
        reg.recorders.write_alert(
            buffer.pos0(),
            &format!("scanner={name}"),
            &format!("<exception>{message}</exception>"),
        );
    }
}
