use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use super::Metric;

type Store = HashMap<String, Metric>;

/// Last-known-good metric samples keyed by identity.
///
/// The store sits behind an `Arc` so `replace` is a single reference swap and
/// readers iterate an immutable snapshot. Writers copy the map only when a
/// snapshot is still shared.
#[derive(Debug, Default)]
pub struct MetricCache {
    store: RwLock<Arc<Store>>,
}

impl MetricCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the sample stored under the metric's identity
    pub async fn add(&self, metric: Metric) {
        let mut store = self.store.write().await;
        Arc::make_mut(&mut *store).insert(metric.identity().to_string(), metric);
    }

    /// Upsert every entry of `other` into this cache
    pub async fn merge(&self, other: &MetricCache) {
        if std::ptr::eq(self, other) {
            return;
        }
        // Snapshot first so both locks are never held together
        let incoming = other.snapshot().await;
        let mut store = self.store.write().await;
        if Arc::ptr_eq(&*store, &incoming) {
            return;
        }
        let target = Arc::make_mut(&mut *store);
        for (identity, metric) in incoming.iter() {
            target.insert(identity.clone(), metric.clone());
        }
    }

    /// Swap in the contents of `other` wholesale
    pub async fn replace(&self, other: &MetricCache) {
        if std::ptr::eq(self, other) {
            return;
        }
        let incoming = other.snapshot().await;
        *self.store.write().await = incoming;
    }

    /// Current set of identities
    pub async fn index(&self) -> HashSet<String> {
        self.store.read().await.keys().cloned().collect()
    }

    pub async fn get(&self, identity: &str) -> Option<Metric> {
        self.store.read().await.get(identity).cloned()
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }

    /// Immutable view of the whole store at this instant
    pub async fn snapshot(&self) -> Arc<HashMap<String, Metric>> {
        Arc::clone(&*self.store.read().await)
    }

    /// Forward every cached sample whose identity is not in `exclude`.
    ///
    /// Returns the number of samples delivered. Stops early if the sink is closed.
    pub async fn send_all(&self, sink: &mpsc::Sender<Metric>, exclude: &HashSet<String>) -> usize {
        let snapshot = self.snapshot().await;
        let mut sent = 0;
        for (identity, metric) in snapshot.iter() {
            if exclude.contains(identity) {
                continue;
            }
            if sink.send(metric.clone()).await.is_err() {
                debug!("Metric sink closed while sending cached samples");
                break;
            }
            sent += 1;
        }
        sent
    }
}
