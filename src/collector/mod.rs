//! Collector layer
//!
//! The [`ZfsCollector`] coordinator runs one collection cycle per scrape. It
//! fans out to the enabled [`SubCollector`]s, races them against a deadline and
//! falls back to the last-known-good [`MetricCache`](crate::metrics::MetricCache)
//! for anything that did not arrive in time.
//!
//! - [`SubCollector`]: one implementation per entity kind (pool, dataset kinds)
//! - [`CollectorRegistration`]: name, enabled flag, properties and factory
//! - [`ReadinessGate`]: keeps collection cycles single-flight

mod coordinator;
mod dataset;
mod gate;
mod pool;
pub mod properties;
mod registry;

pub use coordinator::{ScrapeConfig, ZfsCollector, SCRAPE_DURATION, SCRAPE_SUCCESS};
pub use dataset::DatasetCollector;
pub use gate::{GatePermit, ReadinessGate};
pub use pool::PoolCollector;
pub use registry::{
    default_registrations, parse_property_list, CollectorFactory, CollectorRegistration,
    DATASET_FILESYSTEM, DATASET_SNAPSHOT, DATASET_VOLUME, POOL,
};

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::metrics::{Metric, MetricDesc};
use crate::zfs::ZfsError;

/// Errors a sub-collector can report for its whole category
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("backend query failed: {0}")]
    Backend(#[from] ZfsError),

    #[error("invalid metric: {0}")]
    Metric(#[from] prometheus::Error),

    /// A single raw value could not be converted
    #[error("converting property '{property}' with value '{value}' failed: {reason}")]
    Conversion {
        property: String,
        value: String,
        reason: String,
    },

    #[error("metric conduit closed")]
    SinkClosed,

    #[error("unknown collector kind: {0}")]
    UnknownKind(String),

    #[error("invalid exclude pattern: {0}")]
    InvalidExclude(#[from] regex::Error),

    #[error("collector panicked: {0}")]
    Panicked(String),
}

/// Dataset name patterns that dataset collectors skip
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    patterns: Vec<Regex>,
}

impl ExclusionSet {
    /// Compile every pattern, failing on the first invalid one
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// True if any pattern matches `name`
    pub fn is_match(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(name))
    }
}

/// One entity-kind collector.
///
/// `update` pushes samples for the given pools into `sink`. It returns an error
/// only when the category as a whole could not be queried; samples already sent
/// before the error stand.
#[async_trait]
pub trait SubCollector: Send + Sync {
    /// Descriptors for the properties this collector was asked for
    fn describe(&self) -> Vec<MetricDesc>;

    async fn update(
        &self,
        sink: &mpsc::Sender<Metric>,
        pools: &[String],
        excludes: &ExclusionSet,
    ) -> Result<(), CollectorError>;
}

/// Send one sample, mapping a closed conduit to an error
pub(crate) async fn push(sink: &mpsc::Sender<Metric>, metric: Metric) -> Result<(), CollectorError> {
    sink.send(metric).await.map_err(|_| CollectorError::SinkClosed)
}
