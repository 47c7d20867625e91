use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::process::Command as AsyncCommand;
use tracing::trace;

use super::{DatasetKind, DatasetProperties, ZfsClient, ZfsError};

/// Backend client that shells out to `zpool` and `zfs`
#[derive(Debug, Clone)]
pub struct CommandClient {
    zpool: PathBuf,
    zfs: PathBuf,
}

impl CommandClient {
    pub fn new() -> Self {
        Self {
            zpool: PathBuf::from("zpool"),
            zfs: PathBuf::from("zfs"),
        }
    }

    /// Use explicit binary paths instead of resolving through `PATH`
    pub fn with_binaries(zpool: impl Into<PathBuf>, zfs: impl Into<PathBuf>) -> Self {
        Self {
            zpool: zpool.into(),
            zfs: zfs.into(),
        }
    }

    async fn run(&self, program: &PathBuf, args: &[&str]) -> Result<String, ZfsError> {
        let rendered = format!("{} {}", program.display(), args.join(" "));
        trace!("Running backend command: {}", rendered);

        let output = AsyncCommand::new(program)
            .args(args)
            .kill_on_drop(false)
            .output()
            .await
            .map_err(|source| ZfsError::Spawn {
                command: rendered.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ZfsError::Command {
                command: rendered,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8(output.stdout)?)
    }
}

impl Default for CommandClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ZfsClient for CommandClient {
    async fn pool_names(&self) -> Result<Vec<String>, ZfsError> {
        let stdout = self.run(&self.zpool, &["list", "-Ho", "name"]).await?;
        Ok(parse_pool_names(&stdout))
    }

    async fn pool_properties(
        &self,
        pool: &str,
        properties: &[String],
    ) -> Result<HashMap<String, String>, ZfsError> {
        let props = properties.join(",");
        let stdout = self
            .run(&self.zpool, &["get", "-Hpo", "name,property,value", &props, pool])
            .await?;
        parse_pool_properties(pool, &stdout)
    }

    async fn dataset_properties(
        &self,
        pool: &str,
        kind: DatasetKind,
        properties: &[String],
    ) -> Result<Vec<DatasetProperties>, ZfsError> {
        let props = properties.join(",");
        let stdout = self
            .run(
                &self.zfs,
                &["get", "-Hprt", kind.as_str(), "-o", "name,property,value", &props, pool],
            )
            .await?;
        parse_dataset_properties(&stdout)
    }
}

fn parse_pool_names(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split a `-H` scripted output line into its name/property/value columns
fn split_columns(line: &str) -> Result<(&str, &str, &str), ZfsError> {
    let columns: Vec<&str> = line.split('\t').collect();
    match columns.as_slice() {
        [name, property, value] => Ok((name, property, value)),
        _ => Err(ZfsError::InvalidOutput(format!(
            "expected 3 columns, got {}: '{}'",
            columns.len(),
            line
        ))),
    }
}

fn parse_pool_properties(pool: &str, stdout: &str) -> Result<HashMap<String, String>, ZfsError> {
    let mut properties = HashMap::new();
    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        let (name, property, value) = split_columns(line)?;
        if name != pool {
            return Err(ZfsError::InvalidOutput(format!(
                "expected pool '{}', got '{}'",
                pool, name
            )));
        }
        properties.insert(property.to_string(), value.to_string());
    }
    Ok(properties)
}

fn parse_dataset_properties(stdout: &str) -> Result<Vec<DatasetProperties>, ZfsError> {
    let mut datasets: Vec<DatasetProperties> = Vec::new();
    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        let (name, property, value) = split_columns(line)?;
        // `zfs get` prints every property of a dataset before moving to the next one
        if datasets.last().map_or(true, |ds| ds.name != name) {
            datasets.push(DatasetProperties {
                name: name.to_string(),
                properties: HashMap::new(),
            });
        }
        if let Some(current) = datasets.last_mut() {
            current
                .properties
                .insert(property.to_string(), value.to_string());
        }
    }
    Ok(datasets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_names_skip_blank_lines() {
        let names = parse_pool_names("tank\nbackup\n\n");
        assert_eq!(names, vec!["tank", "backup"]);
    }

    #[test]
    fn pool_properties_are_keyed_by_property() {
        let out = "tank\tsize\t2048\ntank\thealth\tONLINE\n";
        let props = parse_pool_properties("tank", out).unwrap();
        assert_eq!(props.get("size").map(String::as_str), Some("2048"));
        assert_eq!(props.get("health").map(String::as_str), Some("ONLINE"));
    }

    #[test]
    fn pool_properties_reject_foreign_pool() {
        let err = parse_pool_properties("tank", "other\tsize\t1\n").unwrap_err();
        assert!(matches!(err, ZfsError::InvalidOutput(_)));
    }

    #[test]
    fn short_lines_are_invalid() {
        let err = parse_dataset_properties("tank/a\tused\n").unwrap_err();
        assert!(err.to_string().contains("expected 3 columns"));
    }

    #[test]
    fn dataset_lines_are_grouped_in_order() {
        let out = "tank/a\tused\t10\ntank/a\tavailable\t20\ntank/b\tused\t30\n";
        let datasets = parse_dataset_properties(out).unwrap();
        assert_eq!(datasets.len(), 2);
        assert_eq!(datasets[0].name, "tank/a");
        assert_eq!(datasets[0].properties.len(), 2);
        assert_eq!(datasets[1].name, "tank/b");
        assert_eq!(datasets[1].properties.get("used").map(String::as_str), Some("30"));
    }
}
