use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::properties::POOL_PROPERTIES;
use super::registry::POOL;
use super::{push, CollectorError, ExclusionSet, SubCollector};
use crate::metrics::{Metric, MetricDesc};
use crate::zfs::ZfsClient;

/// Pool-level properties, queried for every pool concurrently
pub struct PoolCollector {
    client: Arc<dyn ZfsClient>,
    properties: Vec<String>,
}

impl PoolCollector {
    pub fn new(client: Arc<dyn ZfsClient>, properties: Vec<String>) -> Self {
        Self { client, properties }
    }

    async fn update_pool(&self, sink: &mpsc::Sender<Metric>, pool: &str) -> Result<(), CollectorError> {
        let values = self.client.pool_properties(pool, &self.properties).await?;

        let mut names: Vec<&String> = values.keys().collect();
        names.sort();

        for name in names {
            let value = &values[name];
            let property = POOL_PROPERTIES.find(POOL, name);
            match property.sample(name, value, &[pool]) {
                Ok(metric) => push(sink, metric).await?,
                Err(e @ CollectorError::Conversion { .. }) => {
                    warn!(collector = POOL, pool = pool, "Skipping sample: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SubCollector for PoolCollector {
    fn describe(&self) -> Vec<MetricDesc> {
        let mut descs: Vec<MetricDesc> = Vec::new();
        for name in &self.properties {
            let desc = POOL_PROPERTIES.find(POOL, name).desc;
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
        _excludes: &ExclusionSet,
    ) -> Result<(), CollectorError> {
        if self.properties.is_empty() {
            debug!(collector = POOL, "No properties requested");
            return Ok(());
        }

        let results = join_all(pools.iter().map(|pool| self.update_pool(sink, pool))).await;
        // First failure wins; samples from the other pools were already sent
        results.into_iter().collect::<Result<Vec<_>, _>>()?;
        Ok(())
    }
}
