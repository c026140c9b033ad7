//! Process-wide aggregation store.
//!
//! A `Registry` maps each `SectionPath` to its accumulated samples and owns
//! the collection flag. Every thread finishing a section funnels its
//! measurement through `record()`, which serializes on a single mutex held
//! for one hash lookup and a push.
//!
//! Reporting takes a `Snapshot`: nodes are cloned under the lock and the lock
//! is released before any statistics or rendering happen.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::Config;
use crate::device::{DeviceSync, NoDevice};
use crate::error::Error;
use crate::path::SectionPath;
use crate::stats::SectionStats;

/// Accumulated samples for one path.
struct Node {
    runs: u64,
    total: Duration,
    min: Duration,
    max: Duration,
    samples: VecDeque<Duration>,
    order: u64,
}

impl Node {
    fn new(order: u64) -> Self {
        Self {
            runs: 0,
            total: Duration::ZERO,
            min: Duration::MAX,
            max: Duration::ZERO,
            samples: VecDeque::new(),
            order,
        }
    }

    fn push(&mut self, elapsed: Duration, max_samples: Option<NonZeroUsize>) {
        self.runs += 1;
        self.total = self.total.saturating_add(elapsed);
        self.min = self.min.min(elapsed);
        self.max = self.max.max(elapsed);
        if let Some(cap) = max_samples
            && self.samples.len() >= cap.get()
        {
            self.samples.pop_front();
        }
        self.samples.push_back(elapsed);
    }

    fn snapshot(&self, path: &SectionPath) -> NodeSnapshot {
        NodeSnapshot {
            path: path.clone(),
            runs: self.runs,
            total: self.total,
            min: self.min,
            max: self.max,
            samples: self.samples.iter().copied().collect(),
            order: self.order,
        }
    }
}

#[derive(Default)]
struct Store {
    nodes: HashMap<SectionPath, Node>,
    next_order: u64,
}

/// Point-in-time copy of one aggregated path.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub path: SectionPath,
    pub runs: u64,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
    /// Retained samples in arrival order.
    pub samples: Vec<Duration>,
    /// First-seen index, unique within the registry since the last reset.
    pub order: u64,
}

/// Point-in-time copy of every aggregated path, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    nodes: Vec<NodeSnapshot>,
}

impl Snapshot {
    pub fn nodes(&self) -> &[NodeSnapshot] {
        &self.nodes
    }

    pub fn get(&self, path: &SectionPath) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| &n.path == path)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn stats(&self) -> Vec<SectionStats> {
        self.nodes.iter().map(SectionStats::from_node).collect()
    }
}

/// The global store: aggregated nodes, the collection flag, and the device
/// synchronizer used by device-timed sections.
pub struct Registry {
    store: Mutex<Store>,
    enabled: AtomicBool,
    max_samples: Option<NonZeroUsize>,
    device: Arc<dyn DeviceSync>,
    /// Set once the missing-device warning has been logged.
    device_warned: AtomicBool,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("enabled", &self.is_enabled())
            .field("max_samples", &self.max_samples)
            .field("paths", &self.lock().nodes.len())
            .field("device", &self.device)
            .finish()
    }
}

impl Registry {
    pub fn new(config: Config) -> Self {
        Self::with_device_sync(config, Arc::new(NoDevice))
    }

    pub fn with_device_sync(config: Config, device: Arc<dyn DeviceSync>) -> Self {
        Self {
            store: Mutex::new(Store::default()),
            enabled: AtomicBool::new(config.enabled),
            max_samples: config.max_samples,
            device,
            device_warned: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add one completed invocation of `path`. No-op while disabled.
    ///
    /// Returns whether the sample was recorded. A path with no segments or a
    /// blank segment is rejected with `Error::Configuration`.
    pub fn record(&self, path: &SectionPath, elapsed: Duration) -> Result<bool, Error> {
        if !path.is_valid() {
            return Err(Error::Configuration(format!(
                "cannot record section path {path:?}: segments must be non-empty"
            )));
        }
        if !self.is_enabled() {
            return Ok(false);
        }
        let mut store = self.lock();
        let Store { nodes, next_order } = &mut *store;
        let node = nodes.entry(path.clone()).or_insert_with(|| {
            let order = *next_order;
            *next_order += 1;
            Node::new(order)
        });
        node.push(elapsed, self.max_samples);
        Ok(true)
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut nodes: Vec<NodeSnapshot> = {
            let store = self.lock();
            store
                .nodes
                .iter()
                .map(|(path, node)| node.snapshot(path))
                .collect()
        };
        nodes.sort_by_key(|n| n.order);
        Snapshot { nodes }
    }

    /// Drop every aggregated node. The collection flag and any open sections
    /// are left alone; a section still open records normally when it ends.
    pub fn reset(&self) {
        let mut store = self.lock();
        store.nodes.clear();
        store.next_order = 0;
    }

    pub fn enable(&self) {
        if !self.enabled.swap(true, Ordering::SeqCst) {
            log::debug!("timetap: collection enabled");
        }
    }

    /// Stop recording. Warns once per enabled-to-disabled transition.
    pub fn disable(&self) {
        if self.enabled.swap(false, Ordering::SeqCst) {
            log::warn!(
                "timetap: collection disabled; sections ending before enable() are not recorded"
            );
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn max_samples(&self) -> Option<NonZeroUsize> {
        self.max_samples
    }

    pub fn device_sync(&self) -> &dyn DeviceSync {
        &*self.device
    }

    /// Wait for outstanding device work. Without a device this only times the
    /// host, and says so once per registry.
    pub(crate) fn synchronize_device(&self) {
        let device = self.device_sync();
        if !device.is_available() && !self.device_warned.swap(true, Ordering::Relaxed) {
            log::warn!(
                "timetap: device sync requested but no device synchronizer is installed; \
                 timing the host only"
            );
        }
        device.synchronize();
    }
}
