//! Feature recorder interface.
//!
//! Recorders are the sink for everything scanners find. Persistent backends
//! (feature files, databases, histogram generation) live outside this crate
//! and plug in through [`FeatureRecorder`] and [`RecorderFactory`]. Two
//! in-tree implementations cover tests and log-only runs:
//!
//! - [`MemoryRecorder`] collects features in memory;
//! - [`TracingRecorder`] emits each feature as a `tracing` event.
//!
//! The engine writes its own diagnostics (depth exceeded, scanner failures)
//! to the channel named [`ALERT_CHANNEL`].

use std::fmt;
use std::sync::{Arc, Mutex};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::path::ForensicPath;

/// Name of the channel the engine writes alerts to.
pub const ALERT_CHANNEL: &str = "alerts";

/// One recorded feature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub pos: ForensicPath,
    pub feature: String,
    pub context: String,
}

/// A named output channel.
///
/// Implementations must be callable from any worker thread.
pub trait FeatureRecorder: Send + Sync {
    /// Channel name.
    fn name(&self) -> &str;

    /// Records `feature` found at `pos`, with surrounding `context`.
    fn write(&self, pos: &ForensicPath, feature: &str, context: &str);

    /// Flushes buffered output. Called once at engine shutdown.
    fn flush(&self) {}
}

/// Creates the recorder for a channel when the engine freezes its registry.
pub trait RecorderFactory: Send + Sync {
    fn create(&self, channel: &str) -> Arc<dyn FeatureRecorder>;
}

impl<F> RecorderFactory for F
where
    F: Fn(&str) -> Arc<dyn FeatureRecorder> + Send + Sync,
{
    fn create(&self, channel: &str) -> Arc<dyn FeatureRecorder> {
        self(channel)
    }
}

// ============================================================================
// MemoryRecorder
// ============================================================================

/// Collects features in memory.
pub struct MemoryRecorder {
    name: String,
    features: Mutex<Vec<Feature>>,
}

impl MemoryRecorder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            features: Mutex::new(Vec::new()),
        }
    }

    /// Copy of every feature recorded so far, in arrival order.
    pub fn features(&self) -> Vec<Feature> {
        self.features.lock().expect("recorder poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.features.lock().expect("recorder poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns every recorded feature.
    pub fn take(&self) -> Vec<Feature> {
        std::mem::take(&mut *self.features.lock().expect("recorder poisoned"))
    }
}

impl FeatureRecorder for MemoryRecorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&self, pos: &ForensicPath, feature: &str, context: &str) {
        self.features
            .lock()
            .expect("recorder poisoned")
            .push(Feature {
                pos: pos.clone(),
                feature: feature.to_string(),
                context: context.to_string(),
            });
    }
}

impl fmt::Debug for MemoryRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRecorder")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}

/// Factory that hands out [`MemoryRecorder`]s and keeps a handle to each so
/// callers can inspect results after the scan.
#[derive(Default)]
pub struct MemoryRecorders {
    created: Mutex<AHashMap<String, Arc<MemoryRecorder>>>,
}

impl MemoryRecorders {
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorder created for `channel`, if any.
    pub fn get(&self, channel: &str) -> Option<Arc<MemoryRecorder>> {
        self.created
            .lock()
            .expect("recorder map poisoned")
            .get(channel)
            .cloned()
    }

    /// Features recorded on `channel` (empty when the channel was never
    /// created).
    pub fn features(&self, channel: &str) -> Vec<Feature> {
        self.get(channel).map(|r| r.features()).unwrap_or_default()
    }

    /// Features recorded on the alert channel.
    pub fn alerts(&self) -> Vec<Feature> {
        self.features(ALERT_CHANNEL)
    }
}

impl RecorderFactory for MemoryRecorders {
    fn create(&self, channel: &str) -> Arc<dyn FeatureRecorder> {
        let mut created = self.created.lock().expect("recorder map poisoned");
        let rec = created
            .entry(channel.to_string())
            .or_insert_with(|| Arc::new(MemoryRecorder::new(channel)));
        Arc::clone(rec) as Arc<dyn FeatureRecorder>
    }
}

// ============================================================================
// TracingRecorder
// ============================================================================

/// Emits each feature as a `tracing` event under the `features` target.
/// Alerts are logged at `warn`, everything else at `info`.
#[derive(Debug)]
pub struct TracingRecorder {
    name: String,
}

impl TracingRecorder {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Factory creating a `TracingRecorder` for every channel.
    pub fn factory() -> impl RecorderFactory {
        |channel: &str| Arc::new(TracingRecorder::new(channel)) as Arc<dyn FeatureRecorder>
    }
}

impl FeatureRecorder for TracingRecorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&self, pos: &ForensicPath, feature: &str, context: &str) {
        if self.name == ALERT_CHANNEL {
            warn!(target: "features", channel = %self.name, pos = %pos, feature, context);
        } else {
            info!(target: "features", channel = %self.name, pos = %pos, feature, context);
        }
    }
}

// ============================================================================
// RecorderSet
// ============================================================================

/// The recorders of a scan, keyed by channel name, plus the alert channel.
///
/// Built once when the engine freezes its registry; read-only afterwards.
pub struct RecorderSet {
    channels: AHashMap<String, Arc<dyn FeatureRecorder>>,
    alert: Arc<dyn FeatureRecorder>,
}

impl RecorderSet {
    /// Creates the alert channel and one recorder per name in `channels`.
    /// Duplicate names share one recorder.
    pub fn build<'a>(
        factory: &dyn RecorderFactory,
        channels: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let alert = factory.create(ALERT_CHANNEL);
        let mut map: AHashMap<String, Arc<dyn FeatureRecorder>> = AHashMap::new();
        map.insert(ALERT_CHANNEL.to_string(), Arc::clone(&alert));
        for name in channels {
            if !map.contains_key(name) {
                map.insert(name.to_string(), factory.create(name));
            }
        }
        Self {
            channels: map,
            alert,
        }
    }

    /// Recorder for `channel`.
    pub fn get(&self, channel: &str) -> Option<&Arc<dyn FeatureRecorder>> {
        self.channels.get(channel)
    }

    /// The alert channel.
    pub fn alert(&self) -> &Arc<dyn FeatureRecorder> {
        &self.alert
    }

    /// Writes an alert and mirrors it to the log.
    pub fn write_alert(&self, pos: &ForensicPath, feature: &str, context: &str) {
        warn!(pos = %pos, feature, context, "alert");
        self.alert.write(pos, feature, context);
    }

    /// Channel names in no particular order.
    pub fn channel_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.channels.keys().map(String::as_str)
    }

    pub(crate) fn flush_all(&self) {
        for rec in self.channels.values() {
            rec.flush();
        }
    }
}

impl fmt::Debug for RecorderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.channel_names().collect();
        names.sort_unstable();
        f.debug_struct("RecorderSet").field("channels", &names).finish()
    }
}
