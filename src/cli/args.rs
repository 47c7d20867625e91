use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone, Default)]
#[command(
    author,
    version,
    about = "Prometheus exporter for ZFS pools and datasets",
    long_about = "Exports ZFS pool and dataset properties in the Prometheus text format.\n\
Every scrape runs the enabled collectors concurrently under a deadline. Anything that\n\
does not arrive in time is served from the last successful collection, and the slow\n\
collection keeps running in the background to refresh that cache.\n\
---\n\
Collectors: pool, dataset-filesystem, dataset-volume (enabled) and dataset-snapshot (disabled).\n\
Examples:\n\
  zfs-exporter --pool tank --exclude '^tank/scratch'\n\
  zfs-exporter --collector.dataset-snapshot --deadline 5s\n\
  zfs-exporter --properties.pool size,free,health --web.listen-address 127.0.0.1:9134"
)]
pub struct Args {
    /// Address to listen on for HTTP requests
    #[arg(long = "web.listen-address", value_name = "ADDR")]
    pub listen_address: Option<String>,

    /// Path under which metrics are exposed
    #[arg(long = "web.telemetry-path", value_name = "PATH")]
    pub telemetry_path: Option<String>,

    /// Maximum time a scrape may take before cached metrics are served (e.g. 500ms, 8s, 1m)
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub deadline: Option<Duration>,

    /// Pool to report on. Repeat for several pools; omit for all pools.
    #[arg(long = "pool", value_name = "NAME")]
    pub pools: Vec<String>,

    /// Regular expression of dataset names to skip. May be repeated.
    #[arg(long = "exclude", value_name = "REGEX")]
    pub excludes: Vec<String>,

    /// Enable or disable the pool collector
    #[arg(long = "collector.pool", value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    pub collector_pool: Option<bool>,

    /// Enable or disable the filesystem dataset collector
    #[arg(long = "collector.dataset-filesystem", value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    pub collector_dataset_filesystem: Option<bool>,

    /// Enable or disable the snapshot dataset collector
    #[arg(long = "collector.dataset-snapshot", value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    pub collector_dataset_snapshot: Option<bool>,

    /// Enable or disable the volume dataset collector
    #[arg(long = "collector.dataset-volume", value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    pub collector_dataset_volume: Option<bool>,

    /// Comma separated pool properties to export
    #[arg(long = "properties.pool", value_name = "LIST")]
    pub properties_pool: Option<String>,

    /// Comma separated filesystem properties to export
    #[arg(long = "properties.dataset-filesystem", value_name = "LIST")]
    pub properties_dataset_filesystem: Option<String>,

    /// Comma separated snapshot properties to export
    #[arg(long = "properties.dataset-snapshot", value_name = "LIST")]
    pub properties_dataset_snapshot: Option<String>,

    /// Comma separated volume properties to export
    #[arg(long = "properties.dataset-volume", value_name = "LIST")]
    pub properties_dataset_volume: Option<String>,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable development mode - also writes logs to a timestamped file
    #[arg(long)]
    pub dev: bool,

    /// Verbosity level (0: error, 1: warn, 2: info, 3: debug, 4+: trace)
    #[arg(short, long, default_value = "2")]
    pub verbosity: u8,
}

pub fn parse_args() -> Args {
    Args::parse()
}

impl Args {
    /// Enabled override given on the command line for a collector, if any
    pub fn collector_enabled(&self, name: &str) -> Option<bool> {
        match name {
            crate::collector::POOL => self.collector_pool,
            crate::collector::DATASET_FILESYSTEM => self.collector_dataset_filesystem,
            crate::collector::DATASET_SNAPSHOT => self.collector_dataset_snapshot,
            crate::collector::DATASET_VOLUME => self.collector_dataset_volume,
            _ => None,
        }
    }

    /// Property list override given on the command line for a collector, if any
    pub fn collector_properties(&self, name: &str) -> Option<&str> {
        match name {
            crate::collector::POOL => self.properties_pool.as_deref(),
            crate::collector::DATASET_FILESYSTEM => self.properties_dataset_filesystem.as_deref(),
            crate::collector::DATASET_SNAPSHOT => self.properties_dataset_snapshot.as_deref(),
            crate::collector::DATASET_VOLUME => self.properties_dataset_volume.as_deref(),
            _ => None,
        }
    }
}

/// Parse durations like `500ms`, `8s`, `2m` or `1h`
pub fn parse_duration(duration: &str) -> Result<Duration> {
    let duration = duration.trim();
    if duration.is_empty() {
        return Err(anyhow!("Duration string cannot be empty"));
    }

    // Split the leading number from the unit
    let split = duration
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(duration.len());
    let (numeric_part, unit_part) = duration.split_at(split);

    if numeric_part.is_empty() {
        return Err(anyhow!("Missing numeric value in duration string"));
    }

    let number = numeric_part
        .parse::<u64>()
        .map_err(|_| anyhow!("Invalid number in duration string"))?;

    let multiplier = match unit_part {
        "ms" => return Ok(Duration::from_millis(number)),
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "" => return Err(anyhow!("Missing time unit. Expected format like '500ms', '8s', '2m'")),
        _ => return Err(anyhow!("Invalid time unit '{}'. Supported units: ms, s, m, h", unit_part)),
    };
    number
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow!("Duration '{}' is too large", duration))
}
