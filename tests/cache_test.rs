use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

use zfs_exporter::collector::ReadinessGate;
use zfs_exporter::metrics::{Metric, MetricCache, MetricDesc};

fn sample(entity: &str, value: f64) -> Metric {
    MetricDesc::new("test", "value", "Test value.", &["entity"])
        .gauge(value, &[entity])
        .unwrap()
}

async fn drain(cache: &MetricCache, exclude: &HashSet<String>) -> Vec<Metric> {
    let (tx, mut rx) = mpsc::channel(64);
    let sent = cache.send_all(&tx, exclude).await;
    drop(tx);

    let mut received = Vec::new();
    while let Some(metric) = rx.recv().await {
        received.push(metric);
    }
    assert_eq!(sent, received.len());
    received
}

#[tokio::test]
async fn add_then_get_returns_equal_metric() {
    // Purpose: Lookup by identity returns what was stored, last write wins
    let cache = MetricCache::new();
    let first = sample("a", 1.0);
    let second = sample("a", 2.0);

    cache.add(first.clone()).await;
    assert_eq!(cache.get(first.identity()).await, Some(first));

    cache.add(second.clone()).await;
    assert_eq!(cache.get(second.identity()).await, Some(second));
    assert_eq!(cache.len().await, 1);
}

#[tokio::test]
async fn merge_into_empty_cache_yields_same_index() {
    let source = MetricCache::new();
    for (entity, value) in [("a", 1.0), ("b", 2.0), ("c", 3.0)] {
        source.add(sample(entity, value)).await;
    }

    let target = MetricCache::new();
    target.merge(&source).await;

    assert_eq!(target.index().await, source.index().await);
}

#[tokio::test]
async fn merge_upserts_and_keeps_existing_entries() {
    let target = MetricCache::new();
    target.add(sample("old", 1.0)).await;
    target.add(sample("shared", 1.0)).await;

    let incoming = MetricCache::new();
    incoming.add(sample("shared", 5.0)).await;
    target.merge(&incoming).await;

    assert_eq!(target.len().await, 2);
    let shared = sample("shared", 0.0);
    assert_eq!(target.get(shared.identity()).await.unwrap().value(), Some(5.0));
}

#[tokio::test]
async fn merge_with_itself_is_a_no_op() {
    let cache = MetricCache::new();
    cache.add(sample("a", 1.0)).await;

    cache.merge(&cache).await;
    cache.replace(&cache).await;

    assert_eq!(cache.len().await, 1);
}

#[tokio::test]
async fn replace_drops_entries_missing_from_source() {
    let target = MetricCache::new();
    target.add(sample("stale", 1.0)).await;

    let fresh = MetricCache::new();
    fresh.add(sample("fresh", 1.0)).await;
    target.replace(&fresh).await;

    let index = target.index().await;
    assert_eq!(index.len(), 1);
    assert!(index.contains(sample("fresh", 0.0).identity()));
}

#[tokio::test]
async fn snapshot_is_not_affected_by_later_replace() {
    // Purpose: Readers holding a snapshot never observe a half-replaced store
    let cache = MetricCache::new();
    cache.add(sample("a", 1.0)).await;
    let before = cache.snapshot().await;

    cache.replace(&MetricCache::new()).await;

    assert_eq!(before.len(), 1);
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn send_all_skips_excluded_identities() {
    let cache = MetricCache::new();
    for entity in ["a", "b", "c"] {
        cache.add(sample(entity, 1.0)).await;
    }
    let exclude: HashSet<String> = [sample("b", 0.0).identity().to_string()].into_iter().collect();

    let received = drain(&cache, &exclude).await;

    let identities: HashSet<String> = received.iter().map(|m| m.identity().to_string()).collect();
    assert_eq!(identities.len(), 2);
    assert!(!identities.contains(sample("b", 0.0).identity()));
}

#[tokio::test]
async fn send_all_stops_when_sink_closes() {
    let cache = MetricCache::new();
    cache.add(sample("a", 1.0)).await;
    let (tx, rx) = mpsc::channel(1);
    drop(rx);

    assert_eq!(cache.send_all(&tx, &HashSet::new()).await, 0);
}

#[tokio::test]
async fn concurrent_adds_are_all_kept() {
    let cache = Arc::new(MetricCache::new());
    let mut handles = Vec::new();
    for i in 0..32 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            cache.add(sample(&format!("e{}", i), i as f64)).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(cache.len().await, 32);
}

#[test]
fn gate_is_single_flight_across_clones() {
    let gate = ReadinessGate::new();
    let shared = gate.clone();

    let permit = gate.try_acquire().unwrap();
    assert!(shared.try_acquire().is_none());

    drop(permit);
    assert!(shared.try_acquire().is_some());
}
