use futures::FutureExt;
use once_cell::sync::Lazy;
use prometheus::core::Desc;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{CollectorError, CollectorRegistration, ExclusionSet, GatePermit, ReadinessGate, SubCollector};
use crate::metrics::{Metric, MetricCache, MetricDesc};
use crate::zfs::{ZfsClient, ZfsError};

/// Per-collector scrape duration, emitted once per cycle
pub static SCRAPE_DURATION: Lazy<MetricDesc> = Lazy::new(|| {
    MetricDesc::new(
        "scrape",
        "collector_duration_seconds",
        "zfs_exporter: Duration of a collector scrape.",
        &["collector"],
    )
});

/// Per-collector success flag, emitted once per cycle
pub static SCRAPE_SUCCESS: Lazy<MetricDesc> = Lazy::new(|| {
    MetricDesc::new(
        "scrape",
        "collector_success",
        "zfs_exporter: Whether a collector succeeded.",
        &["collector"],
    )
});

/// Runtime settings of the coordinator
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    /// Wall-clock budget of a single scrape
    pub deadline: Duration,
    /// Pools to report on. Empty means every imported pool.
    pub pools: Vec<String>,
    /// Regular expressions of dataset names to skip
    pub excludes: Vec<String>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(8),
            pools: Vec::new(),
            excludes: Vec::new(),
        }
    }
}

/// Deadline-bound scrape coordinator backed by a last-known-good cache.
///
/// Every call to [`collect`](Self::collect) either starts a collection cycle or,
/// when one is still running, serves the cache. A cycle forwards fresh samples
/// as they arrive. If the deadline passes first, cached samples the cycle has
/// not produced yet are sent instead and the cycle finishes in the background,
/// refreshing the cache for the next scrape.
pub struct ZfsCollector {
    deadline: Duration,
    pools: Arc<Vec<String>>,
    excludes: Arc<ExclusionSet>,
    registrations: Arc<Vec<CollectorRegistration>>,
    client: Arc<dyn ZfsClient>,
    cache: Arc<MetricCache>,
    gate: ReadinessGate,
}

/// Mutable state of one cycle, guarded by a single lock
struct CycleState {
    cache: MetricCache,
    forwarded: HashSet<String>,
    /// `None` once the cycle has either completed or timed out
    sink: Option<mpsc::Sender<Metric>>,
    /// Set when pool enumeration failed and no collector ran
    aborted: bool,
}

struct Cycle {
    state: Mutex<CycleState>,
    durable: Arc<MetricCache>,
    /// Cancelled when the caller of `collect` may return
    finished: CancellationToken,
}

/// Stand-in expiry for budgets too large to add to the current instant
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// What the dispatch task needs to start the sub-collectors
struct Dispatch {
    client: Arc<dyn ZfsClient>,
    pools: Arc<Vec<String>>,
    excludes: Arc<ExclusionSet>,
    registrations: Arc<Vec<CollectorRegistration>>,
    deadline: Instant,
}

impl ZfsCollector {
    pub fn new(
        config: ScrapeConfig,
        client: Arc<dyn ZfsClient>,
        registrations: Vec<CollectorRegistration>,
    ) -> Result<Self, CollectorError> {
        let mut pools = config.pools;
        pools.sort();
        pools.dedup();

        let mut patterns = config.excludes;
        patterns.sort();
        let excludes = ExclusionSet::new(&patterns)?;

        Ok(Self {
            deadline: config.deadline,
            pools: Arc::new(pools),
            excludes: Arc::new(excludes),
            registrations: Arc::new(registrations),
            client,
            cache: Arc::new(MetricCache::new()),
            gate: ReadinessGate::new(),
        })
    }

    /// Durable cache shared across cycles
    pub fn cache(&self) -> &Arc<MetricCache> {
        &self.cache
    }

    /// True while a cycle, possibly one past its deadline, still holds the gate
    pub fn is_collecting(&self) -> bool {
        !self.gate.is_available()
    }

    /// Names of the collectors that run each cycle
    pub fn enabled_collectors(&self) -> Vec<&str> {
        self.registrations
            .iter()
            .filter(|r| r.enabled)
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Descriptors for the scrape indicators and every enabled collector
    pub fn describe(&self) -> Result<Vec<Desc>, CollectorError> {
        let mut descs = vec![SCRAPE_DURATION.to_desc()?, SCRAPE_SUCCESS.to_desc()?];
        for registration in self.registrations.iter().filter(|r| r.enabled) {
            let collector = registration.build(Arc::clone(&self.client))?;
            for desc in collector.describe() {
                descs.push(desc.to_desc()?);
            }
        }
        Ok(descs)
    }

    /// Run one scrape, writing samples into `sink`.
    ///
    /// Returns once every fresh sample has been sent or, at the latest, shortly
    /// after the deadline when the cached top-up has been sent. The sink is
    /// dropped by then, so the receiver sees the end of the stream.
    pub async fn collect(&self, sink: mpsc::Sender<Metric>) {
        let Some(permit) = self.gate.try_acquire() else {
            let served = self.cache.send_all(&sink, &HashSet::new()).await;
            info!("Collection already in progress, served {} cached metrics", served);
            return;
        };

        let deadline = deadline_after(self.deadline);
        let cycle = Arc::new(Cycle {
            state: Mutex::new(CycleState {
                cache: MetricCache::new(),
                forwarded: HashSet::new(),
                sink: Some(sink),
                aborted: false,
            }),
            durable: Arc::clone(&self.cache),
            finished: CancellationToken::new(),
        });
        let (conduit_tx, conduit_rx) = mpsc::channel::<Metric>(1);

        tokio::spawn(absorb(Arc::clone(&cycle), conduit_rx, permit));
        tokio::spawn(watch_deadline(Arc::clone(&cycle), deadline, self.deadline));
        tokio::spawn(dispatch(
            Arc::clone(&cycle),
            Dispatch {
                client: Arc::clone(&self.client),
                pools: Arc::clone(&self.pools),
                excludes: Arc::clone(&self.excludes),
                registrations: Arc::clone(&self.registrations),
                deadline,
            },
            conduit_tx,
        ));

        cycle.finished.cancelled().await;
    }
}

fn deadline_after(budget: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(budget).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Resolve the pools to report on against what the backend has imported
async fn select_pools(client: &dyn ZfsClient, wanted: &[String]) -> Result<Vec<String>, ZfsError> {
    let available = client.pool_names().await?;
    if wanted.is_empty() {
        return Ok(available);
    }

    let mut selected = Vec::with_capacity(wanted.len());
    for pool in wanted {
        if available.contains(pool) {
            selected.push(pool.clone());
        } else {
            warn!(pool = %pool, "Pool unavailable");
        }
    }
    Ok(selected)
}

/// Enumerate pools and start one task per enabled collector.
///
/// Dropping the last conduit sender (ours and the tasks') ends the cycle.
async fn dispatch(cycle: Arc<Cycle>, ctx: Dispatch, conduit: mpsc::Sender<Metric>) {
    let enabled = ctx.registrations.iter().filter(|r| r.enabled);

    let pools = match select_pools(ctx.client.as_ref(), &ctx.pools).await {
        Ok(pools) => Arc::new(pools),
        Err(e) => {
            error!("Error finding pools: {}", e);
            cycle.state.lock().await.aborted = true;
            for registration in enabled {
                send_indicators(&conduit, &registration.name, Duration::ZERO, false).await;
            }
            return;
        }
    };
    debug!("Collecting from {} pool(s)", pools.len());

    for registration in enabled {
        let collector = match registration.build(Arc::clone(&ctx.client)) {
            Ok(collector) => collector,
            Err(e) => {
                error!(collector = %registration.name, "Failed to create collector: {}", e);
                send_indicators(&conduit, &registration.name, Duration::ZERO, false).await;
                continue;
            }
        };

        tokio::spawn(execute(
            registration.name.clone(),
            collector,
            conduit.clone(),
            Arc::clone(&pools),
            Arc::clone(&ctx.excludes),
            ctx.deadline,
        ));
    }
}

/// Run one collector and report its duration and success
async fn execute(
    name: String,
    collector: Box<dyn SubCollector>,
    conduit: mpsc::Sender<Metric>,
    pools: Arc<Vec<String>>,
    excludes: Arc<ExclusionSet>,
    deadline: Instant,
) {
    let begin = Instant::now();
    let result = AssertUnwindSafe(collector.update(&conduit, &pools, &excludes))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(CollectorError::Panicked(panic_message(panic.as_ref()))));
    let elapsed = begin.elapsed();
    let seconds = elapsed.as_secs_f64();

    let success = match result {
        Ok(()) if Instant::now() >= deadline => {
            warn!(
                collector = %name,
                duration_seconds = seconds,
                status = "delayed",
                "Collector finished after the deadline"
            );
            false
        }
        Ok(()) => {
            debug!(collector = %name, duration_seconds = seconds, status = "ok", "Collector succeeded");
            true
        }
        Err(e) => {
            error!(
                collector = %name,
                duration_seconds = seconds,
                status = "error",
                "Collector failed: {}",
                e
            );
            false
        }
    };

    send_indicators(&conduit, &name, elapsed, success).await;
}

async fn send_indicators(conduit: &mpsc::Sender<Metric>, collector: &str, duration: Duration, success: bool) {
    let samples = [
        SCRAPE_DURATION.gauge(duration.as_secs_f64(), &[collector]),
        SCRAPE_SUCCESS.gauge(if success { 1.0 } else { 0.0 }, &[collector]),
    ];
    for sample in samples {
        match sample {
            Ok(metric) => {
                if conduit.send(metric).await.is_err() {
                    debug!("Conduit closed before scrape indicators for {} were sent", collector);
                    return;
                }
            }
            Err(e) => error!("Failed to build scrape indicator for {}: {}", collector, e),
        }
    }
}

/// Fan-in: cache every sample and forward fresh ones while the scrape is live.
///
/// Commits the cycle into the durable cache and frees the gate once every
/// collector has dropped its end of the conduit. An aborted cycle only adds its
/// indicators so the last-known-good samples survive.
async fn absorb(cycle: Arc<Cycle>, mut conduit: mpsc::Receiver<Metric>, permit: GatePermit) {
    while let Some(metric) = conduit.recv().await {
        let mut guard = cycle.state.lock().await;
        let state = &mut *guard;
        state.cache.add(metric.clone()).await;

        if let Some(sink) = &state.sink {
            if state.forwarded.insert(metric.identity().to_string()) && sink.send(metric).await.is_err() {
                debug!("Scrape sink closed, sample kept for the cache only");
            }
        }
    }

    let mut state = cycle.state.lock().await;
    let in_time = state.sink.take().is_some();
    if state.aborted {
        cycle.durable.merge(&state.cache).await;
    } else {
        cycle.durable.replace(&state.cache).await;
    }
    let cached = state.cache.len().await;
    drop(state);
    permit.release();

    if in_time {
        debug!("Collection cycle complete, {} metrics cached", cached);
    } else {
        info!("Late collection cycle finished, cache refreshed with {} metrics", cached);
    }
    cycle.finished.cancel();
}

/// Serve cached samples for whatever the cycle has not produced by the deadline
async fn watch_deadline(cycle: Arc<Cycle>, deadline: Instant, budget: Duration) {
    tokio::select! {
        _ = cycle.finished.cancelled() => {}
        _ = tokio::time::sleep_until(deadline) => {
            let mut guard = cycle.state.lock().await;
            let state = &mut *guard;
            // Completed between the timer firing and taking the lock
            let Some(sink) = state.sink.take() else {
                return;
            };

            cycle.durable.merge(&state.cache).await;
            let cached = cycle.durable.send_all(&sink, &state.forwarded).await;
            warn!(
                fresh = state.forwarded.len(),
                cached = cached,
                "Collection deadline of {:?} exceeded, serving cached metrics",
                budget
            );

            drop(sink);
            drop(guard);
            cycle.finished.cancel();
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
