//! Mapping of backend property names onto exported gauges.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use tracing::warn;

use super::CollectorError;
use crate::metrics::{Metric, MetricDesc};
use crate::zfs::PoolStatus;

pub const SUBSYSTEM_POOL: &str = "pool";
pub const SUBSYSTEM_DATASET: &str = "dataset";

pub const POOL_LABELS: &[&str] = &["pool"];
pub const DATASET_LABELS: &[&str] = &["name", "pool", "type"];

const UNSUPPORTED_HELP: &str =
    "!!! This property is unsupported, results are likely to be undesirable !!!";

/// Converts a raw property string into a gauge value
pub type Transform = fn(&str) -> Result<f64, String>;

/// A known property: how it is described and how its value is converted
#[derive(Debug, Clone)]
pub struct Property {
    pub desc: MetricDesc,
    transform: Transform,
    unsupported: bool,
}

impl Property {
    fn new(subsystem: &str, name: &str, help: impl Into<String>, transform: Transform, labels: &[&str]) -> Self {
        Self {
            desc: MetricDesc::new(subsystem, name, help, labels),
            transform,
            unsupported: false,
        }
    }

    pub fn is_unsupported(&self) -> bool {
        self.unsupported
    }

    /// Convert `value` and build a sample with the given label values
    pub fn sample(&self, property: &str, value: &str, label_values: &[&str]) -> Result<Metric, CollectorError> {
        let converted = (self.transform)(value).map_err(|reason| CollectorError::Conversion {
            property: property.to_string(),
            value: value.to_string(),
            reason,
        })?;

        if self.unsupported {
            // Unsupported samples carry the property name as an extra label
            let mut labels = label_values.to_vec();
            labels.push(property);
            return Ok(self.desc.gauge(converted, &labels)?);
        }
        Ok(self.desc.gauge(converted, label_values)?)
    }
}

/// All properties known for one subsystem
#[derive(Debug)]
pub struct PropertyStore {
    subsystem: &'static str,
    labels: &'static [&'static str],
    store: HashMap<&'static str, Property>,
}

impl PropertyStore {
    /// Look up a property, falling back to the generic unsupported gauge.
    ///
    /// Unknown names are logged once per lookup and never fail.
    pub fn find(&self, collector: &str, name: &str) -> Property {
        if let Some(property) = self.store.get(name) {
            return property.clone();
        }

        warn!(
            collector = collector,
            property = name,
            "Property unsupported, exporting it as a generic gauge"
        );
        let mut labels = self.labels.to_vec();
        labels.push("property");
        Property {
            desc: MetricDesc::new(self.subsystem, "unsupported", UNSUPPORTED_HELP, &labels),
            transform: transform_numeric,
            unsupported: true,
        }
    }
}

pub static POOL_PROPERTIES: Lazy<PropertyStore> = Lazy::new(|| {
    let p = |name: &str, help: &str, transform: Transform| Property::new(SUBSYSTEM_POOL, name, help, transform, POOL_LABELS);
    let health_help = format!(
        "Health status code for the pool [{}].",
        PoolStatus::ALL
            .iter()
            .map(|s| format!("{}: {}", s.code(), s.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let store = HashMap::from([
        ("allocated", p("allocated_bytes", "Amount of storage in bytes used within the pool.", transform_numeric)),
        ("capacity", p("capacity_ratio", "Ratio of pool space used.", transform_percentage)),
        (
            "dedupratio",
            p(
                "deduplication_ratio",
                "The ratio of deduplicated size vs undeduplicated size for data in this pool.",
                transform_multiplier,
            ),
        ),
        (
            "expandsize",
            p(
                "expand_size_bytes",
                "Amount of uninitialized space within the pool or device that can be used to increase the total capacity of the pool.",
                transform_numeric,
            ),
        ),
        ("fragmentation", p("fragmentation_ratio", "The fragmentation ratio of the pool.", transform_percentage)),
        ("free", p("free_bytes", "The amount of free space in bytes available in the pool.", transform_numeric)),
        (
            "freeing",
            p(
                "freeing_bytes",
                "The amount of space in bytes remaining to be freed following the destruction of a file system or snapshot.",
                transform_numeric,
            ),
        ),
        ("health", p("health", &health_help, transform_health_code)),
        ("leaked", p("leaked_bytes", "Number of leaked bytes in the pool.", transform_numeric)),
        ("readonly", p("readonly", "Read-only status of the pool [0: read-write, 1: read-only].", transform_bool)),
        ("size", p("size_bytes", "Total size in bytes of the storage pool.", transform_numeric)),
    ]);

    PropertyStore {
        subsystem: SUBSYSTEM_POOL,
        labels: POOL_LABELS,
        store,
    }
});

pub static DATASET_PROPERTIES: Lazy<PropertyStore> = Lazy::new(|| {
    let d = |name: &str, help: &str, transform: Transform| Property::new(SUBSYSTEM_DATASET, name, help, transform, DATASET_LABELS);

    let store = HashMap::from([
        (
            "available",
            d("available_bytes", "The amount of space in bytes available to the dataset and all its children.", transform_numeric),
        ),
        (
            "compressratio",
            d("compression_ratio", "The ratio of compressed size vs uncompressed size for this dataset.", transform_multiplier),
        ),
        (
            "logicalreferenced",
            d(
                "logical_referenced_bytes",
                "The amount of space that is \"logically\" accessible by this dataset. See the \"referenced_bytes\" property.",
                transform_numeric,
            ),
        ),
        (
            "logicalused",
            d(
                "logical_used_bytes",
                "The amount of space in bytes that is \"logically\" consumed by this dataset and all its descendents. See the \"used_bytes\" property.",
                transform_numeric,
            ),
        ),
        (
            "quota",
            d("quota_bytes", "The maximum amount of space in bytes this dataset and its descendents can consume.", transform_numeric),
        ),
        (
            "refcompressratio",
            d(
                "referenced_compression_ratio",
                "The ratio of compressed size vs uncompressed size for the referenced space of this dataset. See also the \"compression_ratio\" property.",
                transform_multiplier,
            ),
        ),
        (
            "referenced",
            d(
                "referenced_bytes",
                "The amount of data in bytes that is accessible by this dataset, which may or may not be shared with other datasets in the pool.",
                transform_numeric,
            ),
        ),
        (
            "refquota",
            d("referenced_quota_bytes", "The maximum amount of space in bytes this dataset can consume.", transform_numeric),
        ),
        (
            "refreservation",
            d(
                "referenced_reservation_bytes",
                "The minimum amount of space in bytes guaranteed to this dataset, not including its descendants.",
                transform_numeric,
            ),
        ),
        (
            "reservation",
            d("reservation_bytes", "The minimum amount of space in bytes guaranteed to a dataset and its descendants.", transform_numeric),
        ),
        (
            "snapshot_count",
            d(
                "snapshot_count_total",
                "The total number of snapshots that exist under this location in the dataset tree.",
                transform_numeric,
            ),
        ),
        (
            "snapshot_limit",
            d("snapshot_limit_total", "The total limit on the number of snapshots that can be created on this dataset and its descendents.", transform_numeric),
        ),
        (
            "used",
            d("used_bytes", "The amount of space in bytes consumed by this dataset and all its descendents.", transform_numeric),
        ),
        (
            "usedbychildren",
            d(
                "used_by_children_bytes",
                "The amount of space in bytes used by children of this dataset, which would be freed if all the dataset's children were destroyed.",
                transform_numeric,
            ),
        ),
        (
            "usedbydataset",
            d(
                "used_by_dataset_bytes",
                "The amount of space in bytes used by this dataset itself, which would be freed if the dataset were destroyed.",
                transform_numeric,
            ),
        ),
        (
            "usedbyrefreservation",
            d(
                "used_by_referenced_reservation_bytes",
                "The amount of space in bytes used by a refreservation set on this dataset, which would be freed if the refreservation was removed.",
                transform_numeric,
            ),
        ),
        (
            "usedbysnapshots",
            d("used_by_snapshot_bytes", "The amount of space in bytes consumed by snapshots of this dataset.", transform_numeric),
        ),
        ("volsize", d("volume_size_bytes", "The logical size in bytes of this volume.", transform_numeric)),
        (
            "written",
            d(
                "written_bytes",
                "The amount of referenced space in bytes written to this dataset since the previous snapshot.",
                transform_numeric,
            ),
        ),
    ]);

    PropertyStore {
        subsystem: SUBSYSTEM_DATASET,
        labels: DATASET_LABELS,
        store,
    }
});

/// Plain numbers. `-` and `none` read as zero; legacy `%`/`x` suffixes are stripped.
pub fn transform_numeric(value: &str) -> Result<f64, String> {
    let trimmed = value.trim();
    if trimmed == "-" || trimmed == "none" {
        return Ok(0.0);
    }
    let number = trimmed.trim_end_matches(['%', 'x']);
    number
        .parse::<f64>()
        .map_err(|e| format!("not a number: {}", e))
}

pub fn transform_percentage(value: &str) -> Result<f64, String> {
    Ok(transform_numeric(value)? / 100.0)
}

pub fn transform_multiplier(value: &str) -> Result<f64, String> {
    Ok(1.0 / transform_numeric(value)?)
}

pub fn transform_bool(value: &str) -> Result<f64, String> {
    match value.trim() {
        "on" | "yes" | "enabled" | "active" => Ok(1.0),
        "off" | "no" | "disabled" | "inactive" | "-" => Ok(0.0),
        other => Err(format!("could not convert '{}' to bool", other)),
    }
}

pub fn transform_health_code(value: &str) -> Result<f64, String> {
    PoolStatus::parse(value.trim())
        .map(|status| f64::from(status.code()))
        .ok_or_else(|| format!("unknown pool health status: {}", value))
}
