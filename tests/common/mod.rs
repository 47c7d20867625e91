// Shared fixtures for the integration tests: a mocked backend client and
// scripted sub-collectors whose timing and output each test controls.
#![allow(dead_code)]

use async_trait::async_trait;
use mockall::mock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use zfs_exporter::collector::{
    CollectorError, CollectorRegistration, ExclusionSet, ScrapeConfig, SubCollector, ZfsCollector,
};
use zfs_exporter::metrics::{Metric, MetricDesc};
use zfs_exporter::zfs::{DatasetKind, DatasetProperties, ZfsClient, ZfsError};

mock! {
    pub Zfs {}

    #[async_trait]
    impl ZfsClient for Zfs {
        async fn pool_names(&self) -> Result<Vec<String>, ZfsError>;
        async fn pool_properties(
            &self,
            pool: &str,
            properties: &[String],
        ) -> Result<HashMap<String, String>, ZfsError>;
        async fn dataset_properties(
            &self,
            pool: &str,
            kind: DatasetKind,
            properties: &[String],
        ) -> Result<Vec<DatasetProperties>, ZfsError>;
    }
}

/// Backend that lists the given pools and answers nothing else
pub fn mock_with_pools(pools: &[&str]) -> MockZfs {
    let pools: Vec<String> = pools.iter().map(|p| p.to_string()).collect();
    let mut mock = MockZfs::new();
    mock.expect_pool_names().returning(move || Ok(pools.clone()));
    mock
}

pub fn dataset(name: &str, properties: &[(&str, &str)]) -> DatasetProperties {
    DatasetProperties {
        name: name.to_string(),
        properties: properties
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

/// Descriptor of the samples scripted collectors emit
pub fn value_desc() -> MetricDesc {
    MetricDesc::new("test", "value", "Scripted test value.", &["entity"])
}

pub fn value_identity(entity: &str) -> String {
    format!("zfs_test_value{{entity=\"{}\"}}", entity)
}

/// What a scripted collector does on one invocation
#[derive(Debug, Clone, Default)]
pub struct Run {
    /// Sent immediately
    pub early: Vec<(&'static str, f64)>,
    /// Pause after the early samples
    pub delay: Duration,
    /// Sent after the pause
    pub late: Vec<(&'static str, f64)>,
    pub fail: bool,
    pub panic: bool,
}

impl Run {
    pub fn emit(samples: &[(&'static str, f64)]) -> Self {
        Self {
            early: samples.to_vec(),
            ..Self::default()
        }
    }
}

/// Sub-collector driven by a list of runs; the last run repeats
#[derive(Clone)]
pub struct ScriptedCollector {
    runs: Arc<Vec<Run>>,
    calls: Arc<AtomicUsize>,
    seen_pools: Arc<Mutex<Vec<Vec<String>>>>,
}

impl ScriptedCollector {
    pub fn new(runs: Vec<Run>) -> Self {
        Self {
            runs: Arc::new(runs),
            calls: Arc::new(AtomicUsize::new(0)),
            seen_pools: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Pool lists received, one entry per invocation
    pub fn seen_pools(&self) -> Vec<Vec<String>> {
        self.seen_pools.lock().unwrap().clone()
    }

    pub fn registration(&self, name: &str) -> CollectorRegistration {
        let collector = self.clone();
        CollectorRegistration::new(name, true, Vec::new(), move |_client, _properties| {
            Ok(Box::new(collector.clone()) as Box<dyn SubCollector>)
        })
    }
}

#[async_trait]
impl SubCollector for ScriptedCollector {
    fn describe(&self) -> Vec<MetricDesc> {
        vec![value_desc()]
    }

    async fn update(
        &self,
        sink: &mpsc::Sender<Metric>,
        pools: &[String],
        _excludes: &ExclusionSet,
    ) -> Result<(), CollectorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_pools.lock().unwrap().push(pools.to_vec());
        let run = self.runs[call.min(self.runs.len() - 1)].clone();

        let desc = value_desc();
        for (entity, value) in &run.early {
            sink.send(desc.gauge(*value, &[*entity]).unwrap())
                .await
                .map_err(|_| CollectorError::SinkClosed)?;
        }
        if !run.delay.is_zero() {
            tokio::time::sleep(run.delay).await;
        }
        if run.panic {
            panic!("scripted collector blew up");
        }
        for (entity, value) in &run.late {
            sink.send(desc.gauge(*value, &[*entity]).unwrap())
                .await
                .map_err(|_| CollectorError::SinkClosed)?;
        }
        if run.fail {
            return Err(CollectorError::Backend(ZfsError::InvalidOutput(
                "scripted failure".to_string(),
            )));
        }
        Ok(())
    }
}

/// Backend whose pool listing takes `delays[n]` on its n-th call; the last
/// delay repeats
pub struct SlowPoolsClient {
    pools: Vec<String>,
    delays: Vec<Duration>,
    calls: AtomicUsize,
}

impl SlowPoolsClient {
    pub fn new(pools: &[&str], delays: Vec<Duration>) -> Self {
        Self {
            pools: pools.iter().map(|p| p.to_string()).collect(),
            delays,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ZfsClient for SlowPoolsClient {
    async fn pool_names(&self) -> Result<Vec<String>, ZfsError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays[call.min(self.delays.len() - 1)];
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.pools.clone())
    }

    async fn pool_properties(
        &self,
        _pool: &str,
        _properties: &[String],
    ) -> Result<HashMap<String, String>, ZfsError> {
        Ok(HashMap::new())
    }

    async fn dataset_properties(
        &self,
        _pool: &str,
        _kind: DatasetKind,
        _properties: &[String],
    ) -> Result<Vec<DatasetProperties>, ZfsError> {
        Ok(Vec::new())
    }
}

pub fn coordinator(
    deadline: Duration,
    client: MockZfs,
    registrations: Vec<CollectorRegistration>,
) -> ZfsCollector {
    coordinator_with_client(deadline, Arc::new(client), registrations)
}

pub fn coordinator_with_client(
    deadline: Duration,
    client: Arc<dyn ZfsClient>,
    registrations: Vec<CollectorRegistration>,
) -> ZfsCollector {
    let config = ScrapeConfig {
        deadline,
        ..ScrapeConfig::default()
    };
    ZfsCollector::new(config, client, registrations).unwrap()
}

/// Run a sub-collector directly and return everything it sent
pub async fn run_collector(
    collector: &dyn SubCollector,
    pools: &[&str],
    excludes: &ExclusionSet,
) -> (Result<(), CollectorError>, Vec<Metric>) {
    let pools: Vec<String> = pools.iter().map(|p| p.to_string()).collect();
    let (tx, mut rx) = mpsc::channel(1024);
    let result = collector.update(&tx, &pools, excludes).await;
    drop(tx);

    let mut metrics = Vec::new();
    while let Some(metric) = rx.recv().await {
        metrics.push(metric);
    }
    (result, metrics)
}

pub fn find<'a>(metrics: &'a [Metric], identity: &str) -> Option<&'a Metric> {
    metrics.iter().find(|m| m.identity() == identity)
}

pub fn value_of(metrics: &[Metric], identity: &str) -> Option<f64> {
    find(metrics, identity).and_then(|m| m.value())
}

/// Value of a scrape indicator (`duration_seconds` or `success`) for a collector
pub fn indicator(metrics: &[Metric], kind: &str, collector: &str) -> Option<f64> {
    let name = match kind {
        "success" => "zfs_scrape_collector_success",
        _ => "zfs_scrape_collector_duration_seconds",
    };
    metrics
        .iter()
        .find(|m| m.name() == name && m.label("collector") == Some(collector))
        .and_then(|m| m.value())
}

/// Panics if any identity was delivered more than once
pub fn assert_unique(metrics: &[Metric]) {
    let mut seen = std::collections::HashSet::new();
    for metric in metrics {
        assert!(seen.insert(metric.identity().to_string()), "duplicate sample {}", metric.identity());
    }
}
