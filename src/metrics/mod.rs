//! Metric samples and descriptors shared by the collectors and the cache.

mod cache;

pub use cache::MetricCache;

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Gauge, Opts};
use std::collections::HashMap;

/// Namespace prefixed to every exported metric
pub const NAMESPACE: &str = "zfs";

/// Static description of a gauge: fully-qualified name, help text and label names
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDesc {
    pub fq_name: String,
    pub help: String,
    pub label_names: Vec<String>,
}

impl MetricDesc {
    /// Build a descriptor named `zfs_<subsystem>_<name>`
    pub fn new(subsystem: &str, name: &str, help: impl Into<String>, labels: &[&str]) -> Self {
        Self {
            fq_name: format!("{}_{}_{}", NAMESPACE, subsystem, name),
            help: help.into(),
            label_names: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    /// Validate and convert into a registry descriptor
    pub fn to_desc(&self) -> prometheus::Result<Desc> {
        Desc::new(
            self.fq_name.clone(),
            self.help.clone(),
            self.label_names.clone(),
            HashMap::new(),
        )
    }

    /// Produce a single gauge sample for this descriptor
    pub fn gauge(&self, value: f64, label_values: &[&str]) -> prometheus::Result<Metric> {
        if label_values.len() != self.label_names.len() {
            return Err(prometheus::Error::InconsistentCardinality {
                expect: self.label_names.len(),
                got: label_values.len(),
            });
        }

        let labels: HashMap<String, String> = self
            .label_names
            .iter()
            .cloned()
            .zip(label_values.iter().map(|v| v.to_string()))
            .collect();

        let gauge = Gauge::with_opts(Opts::new(&self.fq_name, &self.help).const_labels(labels))?;
        gauge.set(value);

        let family = gauge.collect().pop().ok_or_else(|| {
            prometheus::Error::Msg(format!("gauge {} produced no samples", self.fq_name))
        })?;

        Ok(Metric::from_family(family))
    }
}

/// One rendered sample plus the identity it is cached under.
///
/// The identity is the metric name followed by its label pairs in name order,
/// so two samples for the same series always share a key.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    identity: String,
    family: MetricFamily,
}

impl Metric {
    pub fn from_family(family: MetricFamily) -> Self {
        let identity = identity_of(&family);
        Self { identity, family }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn name(&self) -> &str {
        self.family.get_name()
    }

    pub fn family(&self) -> &MetricFamily {
        &self.family
    }

    pub fn into_family(self) -> MetricFamily {
        self.family
    }

    /// Gauge value of the sample, if it carries one
    pub fn value(&self) -> Option<f64> {
        self.family
            .get_metric()
            .first()
            .map(|m| m.get_gauge().get_value())
    }

    /// Value of the label `name`, if present
    pub fn label(&self, name: &str) -> Option<&str> {
        self.family.get_metric().first().and_then(|m| {
            m.get_label()
                .iter()
                .find(|pair| pair.get_name() == name)
                .map(|pair| pair.get_value())
        })
    }
}

fn identity_of(family: &MetricFamily) -> String {
    let mut identity = family.get_name().to_string();
    if let Some(metric) = family.get_metric().first() {
        let mut pairs: Vec<(&str, &str)> = metric
            .get_label()
            .iter()
            .map(|pair| (pair.get_name(), pair.get_value()))
            .collect();
        pairs.sort_unstable();
        identity.push('{');
        let rendered: Vec<String> = pairs
            .into_iter()
            .map(|(name, value)| format!("{}={:?}", name, value))
            .collect();
        identity.push_str(&rendered.join(","));
        identity.push('}');
    }
    identity
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_includes_sorted_labels() {
        let desc = MetricDesc::new("dataset", "used_bytes", "help", &["pool", "name"]);
        let metric = desc.gauge(1.0, &["tank", "tank/home"]).unwrap();
        assert_eq!(
            metric.identity(),
            "zfs_dataset_used_bytes{name=\"tank/home\",pool=\"tank\"}"
        );
        assert_eq!(metric.label("pool"), Some("tank"));
        assert_eq!(metric.value(), Some(1.0));
    }

    #[test]
    fn label_count_mismatch_is_rejected() {
        let desc = MetricDesc::new("pool", "size_bytes", "help", &["pool"]);
        assert!(desc.gauge(1.0, &[]).is_err());
    }
}
