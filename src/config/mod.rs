use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::cli::{parse_duration, Args};
use crate::collector::{default_registrations, CollectorError, parse_property_list, CollectorRegistration, ExclusionSet, ScrapeConfig};

pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:9134";
pub const DEFAULT_TELEMETRY_PATH: &str = "/metrics";
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(8);

/// Contents of the TOML configuration file. Every field is optional and
/// falls back to the built-in default when neither the file nor the
/// command line sets it.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub listen_address: Option<String>,
    pub telemetry_path: Option<String>,
    /// Duration string such as `8s` or `500ms`
    pub deadline: Option<String>,
    pub pools: Option<Vec<String>>,
    pub excludes: Option<Vec<String>>,
    pub collectors: BTreeMap<String, CollectorConfig>,
}

/// Per-collector section, e.g. `[collectors.dataset-snapshot]`
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CollectorConfig {
    pub enabled: Option<bool>,
    pub properties: Option<Vec<String>>,
}

/// Fully resolved runtime settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen_address: SocketAddr,
    pub telemetry_path: String,
    pub scrape: ScrapeConfig,
    pub registrations: Vec<CollectorRegistration>,
}

impl Config {
    /// Default configuration file location
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "zfs-exporter", "zfs-exporter").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Config>(content).context("Failed to parse config file")
    }

    /// Load the configuration file.
    ///
    /// An explicit path must exist and parse. The default location is optional,
    /// and a broken default file is reported and ignored.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            return Self::from_toml(&content).with_context(|| format!("Invalid config file {}", path.display()));
        }

        let Some(default_path) = Self::default_path() else {
            return Ok(Self::default());
        };
        if !default_path.exists() {
            debug!("No config file at {}", default_path.display());
            return Ok(Self::default());
        }

        let content = match fs::read_to_string(&default_path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to read config file {} ({}). Using defaults.", default_path.display(), e);
                return Ok(Self::default());
            }
        };
        match Self::from_toml(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!("Failed to parse config file {} ({:#}). Using defaults.", default_path.display(), e);
                Ok(Self::default())
            }
        }
    }
}

impl Settings {
    /// Merge command line, config file and defaults, then validate the result
    pub fn resolve(args: &Args, config: &Config) -> Result<Self> {
        let listen_address = args
            .listen_address
            .clone()
            .or_else(|| config.listen_address.clone())
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDRESS.to_string());
        let listen_address: SocketAddr = listen_address
            .parse()
            .with_context(|| format!("Invalid listen address '{}'", listen_address))?;

        let telemetry_path = args
            .telemetry_path
            .clone()
            .or_else(|| config.telemetry_path.clone())
            .unwrap_or_else(|| DEFAULT_TELEMETRY_PATH.to_string());
        if !telemetry_path.starts_with('/') {
            return Err(anyhow!("Telemetry path '{}' must start with '/'", telemetry_path));
        }

        let deadline = match (args.deadline, config.deadline.as_deref()) {
            (Some(deadline), _) => deadline,
            (None, Some(text)) => parse_duration(text).with_context(|| format!("Invalid deadline '{}'", text))?,
            (None, None) => DEFAULT_DEADLINE,
        };
        if deadline.is_zero() {
            return Err(anyhow!("Deadline must be greater than zero"));
        }

        let pools = if args.pools.is_empty() {
            config.pools.clone().unwrap_or_default()
        } else {
            args.pools.clone()
        };

        let excludes = if args.excludes.is_empty() {
            config.excludes.clone().unwrap_or_default()
        } else {
            args.excludes.clone()
        };
        ExclusionSet::new(&excludes).context("Invalid exclude pattern")?;

        let registrations = resolve_registrations(args, config)?;

        Ok(Self {
            listen_address,
            telemetry_path,
            scrape: ScrapeConfig {
                deadline,
                pools,
                excludes,
            },
            registrations,
        })
    }
}

fn resolve_registrations(args: &Args, config: &Config) -> Result<Vec<CollectorRegistration>> {
    let mut registrations = default_registrations();

    for name in config.collectors.keys() {
        if !registrations.iter().any(|r| &r.name == name) {
            return Err(CollectorError::UnknownKind(name.clone())).context("Invalid collectors section in config file");
        }
    }

    for registration in registrations.iter_mut() {
        let section = config.collectors.get(&registration.name);

        if let Some(enabled) = args
            .collector_enabled(&registration.name)
            .or_else(|| section.and_then(|s| s.enabled))
        {
            registration.enabled = enabled;
        }

        if let Some(list) = args.collector_properties(&registration.name) {
            registration.properties = parse_property_list(list);
        } else if let Some(properties) = section.and_then(|s| s.properties.as_ref()) {
            registration.properties = properties.iter().map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect();
        }
    }

    Ok(registrations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_default() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::from_toml("listen = \"x\"").is_err());
    }
}
