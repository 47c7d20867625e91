use std::fmt;
use std::sync::Arc;

use super::{CollectorError, DatasetCollector, PoolCollector, SubCollector};
use crate::zfs::{DatasetKind, ZfsClient};

pub const POOL: &str = "pool";
pub const DATASET_FILESYSTEM: &str = "dataset-filesystem";
pub const DATASET_SNAPSHOT: &str = "dataset-snapshot";
pub const DATASET_VOLUME: &str = "dataset-volume";

const DEFAULT_POOL_PROPS: &str = "allocated,dedupratio,fragmentation,free,freeing,health,leaked,readonly,size";
const DEFAULT_FILESYSTEM_PROPS: &str = "available,logicalused,quota,referenced,used,usedbydataset,written";
const DEFAULT_SNAPSHOT_PROPS: &str = "logicalused,referenced,used,written";
const DEFAULT_VOLUME_PROPS: &str = "available,logicalused,referenced,used,usedbydataset,volsize,written";

/// Builds a sub-collector from the backend client and its requested properties
pub type CollectorFactory = Arc<
    dyn Fn(Arc<dyn ZfsClient>, &[String]) -> Result<Box<dyn SubCollector>, CollectorError>
        + Send
        + Sync,
>;

/// A named category the coordinator may run each cycle
#[derive(Clone)]
pub struct CollectorRegistration {
    pub name: String,
    pub enabled: bool,
    pub properties: Vec<String>,
    factory: CollectorFactory,
}

impl CollectorRegistration {
    pub fn new<F>(name: impl Into<String>, enabled: bool, properties: Vec<String>, factory: F) -> Self
    where
        F: Fn(Arc<dyn ZfsClient>, &[String]) -> Result<Box<dyn SubCollector>, CollectorError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            enabled,
            properties,
            factory: Arc::new(factory),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_properties(mut self, properties: Vec<String>) -> Self {
        self.properties = properties;
        self
    }

    /// Instantiate the sub-collector for one cycle
    pub fn build(&self, client: Arc<dyn ZfsClient>) -> Result<Box<dyn SubCollector>, CollectorError> {
        (self.factory)(client, &self.properties)
    }
}

impl fmt::Debug for CollectorRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectorRegistration")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

/// Split a comma separated property list, dropping blanks
pub fn parse_property_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn dataset_registration(name: &str, enabled: bool, props: &str, kind: DatasetKind) -> CollectorRegistration {
    CollectorRegistration::new(name, enabled, parse_property_list(props), move |client, properties| {
        Ok(Box::new(DatasetCollector::new(kind, client, properties.to_vec())) as Box<dyn SubCollector>)
    })
}

/// The built-in categories with their default state and property lists
pub fn default_registrations() -> Vec<CollectorRegistration> {
    vec![
        CollectorRegistration::new(POOL, true, parse_property_list(DEFAULT_POOL_PROPS), |client, properties| {
            Ok(Box::new(PoolCollector::new(client, properties.to_vec())) as Box<dyn SubCollector>)
        }),
        dataset_registration(DATASET_FILESYSTEM, true, DEFAULT_FILESYSTEM_PROPS, DatasetKind::Filesystem),
        dataset_registration(DATASET_SNAPSHOT, false, DEFAULT_SNAPSHOT_PROPS, DatasetKind::Snapshot),
        dataset_registration(DATASET_VOLUME, true, DEFAULT_VOLUME_PROPS, DatasetKind::Volume),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_lists_ignore_blanks() {
        assert_eq!(parse_property_list(" used, ,available,"), vec!["used", "available"]);
        assert!(parse_property_list("").is_empty());
    }

    #[test]
    fn snapshots_are_disabled_by_default() {
        let regs = default_registrations();
        let names: Vec<_> = regs.iter().map(|r| (r.name.as_str(), r.enabled)).collect();
        assert_eq!(
            names,
            vec![
                (POOL, true),
                (DATASET_FILESYSTEM, true),
                (DATASET_SNAPSHOT, false),
                (DATASET_VOLUME, true),
            ]
        );
    }
}
