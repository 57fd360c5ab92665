//! Sensor producer tasks.
//!
//! One task per configured sensor. Each tick produces a value, stamps it
//! with the wall clock, and feeds it to the state engine as a local update
//! under the key `"<node_id>:<name>"`. Sampling is drift-free: the interval
//! fires on period boundaries regardless of how long a tick took.

use crate::core::time::now_ms;
use crate::sensors::generator::SensorSpec;
use crate::state::{EntryMeta, SensorEntry, StateEngine};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Spawns and tracks the producer task for every configured sensor.
pub struct SensorManager {
    node_id: String,
    engine: Arc<StateEngine>,
    shutdown_rx: watch::Receiver<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl SensorManager {
    /// Create a manager feeding the given engine.
    pub fn new(
        node_id: impl Into<String>,
        engine: Arc<StateEngine>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            engine,
            shutdown_rx,
            handles: Vec::new(),
        }
    }

    /// Start one producer task per spec.
    pub fn start(&mut self, specs: &[SensorSpec]) {
        for spec in specs {
            let task = ProducerTask {
                node_id: self.node_id.clone(),
                spec: spec.clone(),
                engine: Arc::clone(&self.engine),
                shutdown_rx: self.shutdown_rx.clone(),
            };
            self.handles.push(tokio::spawn(task.run()));
            tracing::info!(
                sensor = %spec.name,
                kind = spec.params.kind(),
                period_ms = spec.period_ms,
                "sensor started"
            );
        }
    }

    /// Number of running producers.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// True when no producer is running.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for all producers to observe shutdown and exit.
    pub async fn join(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }
}

struct ProducerTask {
    node_id: String,
    spec: SensorSpec,
    engine: Arc<StateEngine>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ProducerTask {
    async fn run(mut self) {
        let key = format!("{}:{}", self.node_id, self.spec.name);
        let meta = EntryMeta {
            unit: self.spec.params.unit().map(str::to_string),
            period_ms: Some(self.spec.period_ms),
            kind: Some(self.spec.params.kind().to_string()),
        };
        let mut generator = self.spec.generator();
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_millis(self.spec.period_ms));

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => break,
                _ = ticker.tick() => {}
            }
            if *self.shutdown_rx.borrow() {
                break;
            }

            let entry = SensorEntry {
                key: key.clone(),
                value: generator.next_value(),
                ts_ms: now_ms(),
                origin: self.node_id.clone(),
                meta: meta.clone(),
            };
            self.engine.apply_local(entry);
        }

        tracing::debug!(sensor = %self.spec.name, "sensor stopped");
    }
}
