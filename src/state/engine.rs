//! LWW state engine.
//!
//! The engine owns the node's only truly shared mutable state: the global
//! register map plus two clear-on-read update buffers, all behind one mutex
//! so merges and drains are atomic relative to each other.
//!
//! Update routing is what prevents replication loops:
//! - [`StateEngine::apply_local`] (sensor producers) feeds BOTH buffers.
//! - [`StateEngine::apply_remote`] (SENSOR_UPDATE handler) feeds the UI
//!   buffer only, so a received update is never re-broadcast.
//!
//! Merge resolution is last-write-wins on `(ts_ms, origin)` with the
//! lexically larger origin breaking ties. Any permutation of the same merge
//! multiset yields the same final map.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Optional metadata attached to a reading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Unit label (for example "C" or "%").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Producer sampling period in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_ms: Option<u64>,

    /// Producer kind name.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl EntryMeta {
    /// True when no field is set; empty metadata is omitted on the wire.
    pub fn is_empty(&self) -> bool {
        self.unit.is_none() && self.period_ms.is_none() && self.kind.is_none()
    }
}

/// One LWW register value, stored under an origin-scoped key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorEntry {
    /// Composite key `"<origin_node_id>:<sensor_id>"`.
    pub key: String,

    /// Opaque reading: number, boolean, string, or object.
    pub value: Value,

    /// Producer-assigned milliseconds since the Unix epoch.
    pub ts_ms: i64,

    /// Producing node's identity; must equal the key prefix.
    pub origin: String,

    /// Optional metadata.
    #[serde(default, skip_serializing_if = "EntryMeta::is_empty")]
    pub meta: EntryMeta,
}

impl SensorEntry {
    /// Entry without metadata, mostly for tests and internal plumbing.
    pub fn bare(key: &str, value: Value, ts_ms: i64, origin: &str) -> Self {
        Self {
            key: key.to_string(),
            value,
            ts_ms,
            origin: origin.to_string(),
            meta: EntryMeta::default(),
        }
    }

    /// The `sensor_id` part of the key, if the key is well-formed.
    pub fn sensor_id(&self) -> Option<&str> {
        self.key.split_once(':').map(|(_, id)| id)
    }

    /// Whether the key prefix names this entry's origin.
    pub fn key_matches_origin(&self) -> bool {
        match self.key.split_once(':') {
            Some((prefix, sensor_id)) => prefix == self.origin && !sensor_id.is_empty(),
            None => false,
        }
    }
}

/// Read-only projection of an entry for API output (key carried externally).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryView {
    pub value: Value,
    pub ts_ms: i64,
    pub origin: String,
    #[serde(default, skip_serializing_if = "EntryMeta::is_empty")]
    pub meta: EntryMeta,
}

impl From<SensorEntry> for EntryView {
    fn from(entry: SensorEntry) -> Self {
        Self {
            value: entry.value,
            ts_ms: entry.ts_ms,
            origin: entry.origin,
            meta: entry.meta,
        }
    }
}

/// State grouped for API output: origin -> sensor_id -> view.
pub type GroupedState = BTreeMap<String, BTreeMap<String, EntryView>>;

/// Group entries by origin, keyed by the sensor_id part of each key.
///
/// Later entries overwrite earlier ones under the same key, so draining a
/// buffer that saw several writes to one register reports the newest.
pub fn group_by_origin<I>(entries: I) -> GroupedState
where
    I: IntoIterator<Item = SensorEntry>,
{
    let mut grouped = GroupedState::new();
    for entry in entries {
        let sensor_id = match entry.sensor_id() {
            Some(id) => id.to_string(),
            None => continue,
        };
        grouped
            .entry(entry.origin.clone())
            .or_default()
            .insert(sensor_id, entry.into());
    }
    grouped
}

/// LWW comparison: does `candidate` replace `existing`?
///
/// Total order on `(ts_ms, origin)`: strictly newer timestamps win, and on a
/// timestamp tie the lexically larger origin wins. Equal tuples lose, which
/// makes duplicate delivery idempotent.
fn lww_wins(existing: &SensorEntry, candidate: &SensorEntry) -> bool {
    candidate.ts_ms > existing.ts_ms
        || (candidate.ts_ms == existing.ts_ms && candidate.origin > existing.origin)
}

#[derive(Default)]
struct EngineInner {
    /// Global register map; BTreeMap keeps snapshot iteration key-sorted.
    state: BTreeMap<String, SensorEntry>,

    /// Accepted updates awaiting an HTTP `/api/updates` drain.
    ui_updates: Vec<SensorEntry>,

    /// Accepted local updates awaiting the replication publisher.
    replication_updates: Vec<SensorEntry>,
}

/// Thread-safe LWW register-map engine.
pub struct StateEngine {
    node_id: String,
    inner: Mutex<EngineInner>,
    merges_applied: AtomicU64,
    merges_rejected: AtomicU64,
}

impl StateEngine {
    /// Create an empty engine owned by `node_id`.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            inner: Mutex::new(EngineInner::default()),
            merges_applied: AtomicU64::new(0),
            merges_rejected: AtomicU64::new(0),
        }
    }

    /// This engine's owning node id.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Apply a locally produced reading.
    ///
    /// The entry must originate from this node. On acceptance it is buffered
    /// for BOTH the HTTP API and the replication publisher. Returns whether
    /// the merge accepted the entry; rejections are logged, never errors.
    pub fn apply_local(&self, entry: SensorEntry) -> bool {
        if entry.origin != self.node_id {
            tracing::warn!(
                key = %entry.key,
                origin = %entry.origin,
                "local update rejected: origin is not this node"
            );
            self.merges_rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.apply(entry, true)
    }

    /// Apply a reading received from a peer.
    ///
    /// On acceptance the entry is buffered for the HTTP API only; remote
    /// updates never re-enter the replication stream.
    pub fn apply_remote(&self, entry: SensorEntry) -> bool {
        self.apply(entry, false)
    }

    fn apply(&self, entry: SensorEntry, replicate: bool) -> bool {
        if !Self::validate(&entry) {
            self.merges_rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let accepted = {
            let mut inner = self.inner.lock();
            let accept = match inner.state.get(&entry.key) {
                None => true,
                Some(existing) => lww_wins(existing, &entry),
            };
            if accept {
                inner.state.insert(entry.key.clone(), entry.clone());
                inner.ui_updates.push(entry.clone());
                if replicate {
                    inner.replication_updates.push(entry.clone());
                }
            }
            accept
        };

        if accepted {
            self.merges_applied.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %entry.key, origin = %entry.origin, ts_ms = entry.ts_ms, "merge applied");
        } else {
            self.merges_rejected.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %entry.key, origin = %entry.origin, ts_ms = entry.ts_ms, "merge rejected (stale)");
        }
        accepted
    }

    fn validate(entry: &SensorEntry) -> bool {
        if entry.origin.is_empty() {
            tracing::warn!(key = %entry.key, "update rejected: empty origin");
            return false;
        }
        if entry.ts_ms <= 0 {
            tracing::warn!(key = %entry.key, ts_ms = entry.ts_ms, "update rejected: non-positive ts_ms");
            return false;
        }
        if !entry.key_matches_origin() {
            tracing::warn!(
                key = %entry.key,
                origin = %entry.origin,
                "update rejected: key prefix does not match origin"
            );
            return false;
        }
        true
    }

    /// Deep-copied, key-sorted view of the global state grouped by origin.
    pub fn snapshot_state(&self) -> GroupedState {
        let copy: Vec<SensorEntry> = {
            let inner = self.inner.lock();
            inner.state.values().cloned().collect()
        };
        group_by_origin(copy)
    }

    /// Drain the UI buffer (clear-on-read).
    pub fn drain_ui_updates(&self) -> Vec<SensorEntry> {
        std::mem::take(&mut self.inner.lock().ui_updates)
    }

    /// Drain the replication buffer (clear-on-read).
    pub fn drain_replication_updates(&self) -> Vec<SensorEntry> {
        std::mem::take(&mut self.inner.lock().replication_updates)
    }

    /// Number of registers currently stored.
    pub fn len(&self) -> usize {
        self.inner.lock().state.len()
    }

    /// True when no register is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lifetime counters: `(applied, rejected)`.
    pub fn merge_counters(&self) -> (u64, u64) {
        (
            self.merges_applied.load(Ordering::Relaxed),
            self.merges_rejected.load(Ordering::Relaxed),
        )
    }

    /// Log a deterministic per-origin summary of the full state.
    pub fn debug_dump(&self) {
        let snapshot = self.snapshot_state();
        let total: usize = snapshot.values().map(|m| m.len()).sum();
        tracing::debug!(node_id = %self.node_id, total, "full state dump");
        for (origin, sensors) in &snapshot {
            tracing::debug!(%origin, count = sensors.len(), "state dump bucket");
        }
    }
}
