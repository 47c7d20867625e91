use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::properties::DATASET_PROPERTIES;
use super::registry::{DATASET_FILESYSTEM, DATASET_SNAPSHOT, DATASET_VOLUME};
use super::{push, CollectorError, ExclusionSet, SubCollector};
use crate::metrics::{Metric, MetricDesc};
use crate::zfs::{DatasetKind, ZfsClient};

/// Dataset properties for one dataset kind, walked pool by pool
pub struct DatasetCollector {
    kind: DatasetKind,
    client: Arc<dyn ZfsClient>,
    properties: Vec<String>,
}

impl DatasetCollector {
    pub fn new(kind: DatasetKind, client: Arc<dyn ZfsClient>, properties: Vec<String>) -> Self {
        Self {
            kind,
            client,
            properties,
        }
    }

    /// Registration name of the collector for this kind
    pub fn name(&self) -> &'static str {
        match self.kind {
            DatasetKind::Filesystem => DATASET_FILESYSTEM,
            DatasetKind::Snapshot => DATASET_SNAPSHOT,
            DatasetKind::Volume => DATASET_VOLUME,
        }
    }

    async fn update_pool(
        &self,
        sink: &mpsc::Sender<Metric>,
        pool: &str,
        excludes: &ExclusionSet,
    ) -> Result<(), CollectorError> {
        let datasets = self
            .client
            .dataset_properties(pool, self.kind, &self.properties)
            .await?;

        for dataset in datasets {
            if excludes.is_match(&dataset.name) {
                debug!(collector = self.name(), dataset = %dataset.name, "Dataset excluded");
                continue;
            }

            let mut names: Vec<&String> = dataset.properties.keys().collect();
            names.sort();

            for name in names {
                let value = &dataset.properties[name];
                let property = DATASET_PROPERTIES.find(self.name(), name);
                let labels = [dataset.name.as_str(), pool, self.kind.as_str()];
                match property.sample(name, value, &labels) {
                    Ok(metric) => push(sink, metric).await?,
                    Err(e @ CollectorError::Conversion { .. }) => {
                        warn!(collector = self.name(), dataset = %dataset.name, "Skipping sample: {}", e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SubCollector for DatasetCollector {
    fn describe(&self) -> Vec<MetricDesc> {
        let mut descs: Vec<MetricDesc> = Vec::new();
        for name in &self.properties {
            let desc = DATASET_PROPERTIES.find(self.name(), name).desc;
            if !descs.iter().any(|d| d.fq_name == desc.fq_name) {
                descs.push(desc);
            }
        }
        descs
    }

    async fn update(
        &self,
        sink: &mpsc::Sender<Metric>,
        pools: &[String],
        excludes: &ExclusionSet,
    ) -> Result<(), CollectorError> {
        if self.properties.is_empty() {
            debug!(collector = self.name(), "No properties requested");
            return Ok(());
        }

        for pool in pools {
            self.update_pool(sink, pool, excludes).await?;
        }
        Ok(())
    }
}
