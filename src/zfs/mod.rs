//! Backend queries against the local ZFS tooling.
//!
//! Collectors only see the [`ZfsClient`] trait, so tests can swap the real
//! command runner for a mock.

mod command;

pub use command::CommandClient;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Errors raised while querying the backend
#[derive(Debug, Error)]
pub enum ZfsError {
    /// The command could not be started at all
    #[error("failed to start command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command ran but exited unsuccessfully
    #[error("failed to execute command '{command}'; output: '{stderr}'")]
    Command { command: String, stderr: String },

    /// Output did not match the expected tabular layout
    #[error("invalid output from command: {0}")]
    InvalidOutput(String),

    #[error("command output is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Kind of dataset a query targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetKind {
    Filesystem,
    Snapshot,
    Volume,
}

impl DatasetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Filesystem => "filesystem",
            DatasetKind::Snapshot => "snapshot",
            DatasetKind::Volume => "volume",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health states reported by `zpool`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    Online,
    Degraded,
    Faulted,
    Offline,
    Unavail,
    Removed,
    Suspended,
}

impl PoolStatus {
    /// All states, ordered by their numeric health code
    pub const ALL: [PoolStatus; 7] = [
        PoolStatus::Online,
        PoolStatus::Degraded,
        PoolStatus::Faulted,
        PoolStatus::Offline,
        PoolStatus::Unavail,
        PoolStatus::Removed,
        PoolStatus::Suspended,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolStatus::Online => "ONLINE",
            PoolStatus::Degraded => "DEGRADED",
            PoolStatus::Faulted => "FAULTED",
            PoolStatus::Offline => "OFFLINE",
            PoolStatus::Unavail => "UNAVAIL",
            PoolStatus::Removed => "REMOVED",
            PoolStatus::Suspended => "SUSPENDED",
        }
    }

    /// Parse the status text printed by `zpool get health`
    pub fn parse(status: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == status)
    }

    /// Stable numeric code exported for the pool health gauge
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

/// Raw properties for one dataset, as returned by the backend
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DatasetProperties {
    pub name: String,
    pub properties: HashMap<String, String>,
}

/// Query interface used by the sub-collectors
#[async_trait]
pub trait ZfsClient: Send + Sync {
    /// Names of all imported pools
    async fn pool_names(&self) -> Result<Vec<String>, ZfsError>;

    /// Requested properties of a single pool
    async fn pool_properties(
        &self,
        pool: &str,
        properties: &[String],
    ) -> Result<HashMap<String, String>, ZfsError>;

    /// Requested properties of every dataset of `kind` within `pool`
    async fn dataset_properties(
        &self,
        pool: &str,
        kind: DatasetKind,
        properties: &[String],
    ) -> Result<Vec<DatasetProperties>, ZfsError>;
}
