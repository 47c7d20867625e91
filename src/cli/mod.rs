mod args;

pub use args::{parse_args, parse_duration, Args};

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

use crate::collector::ZfsCollector;
use crate::config::{Config, Settings};
use crate::server::{self, AppState};
use crate::zfs::CommandClient;

/// Resolve settings, build the collector and serve until shutdown
pub async fn run(args: Args) -> Result<()> {
    let config = Config::load(args.config.as_deref())?;
    let settings = Settings::resolve(&args, &config)?;

    let collector = ZfsCollector::new(
        settings.scrape.clone(),
        Arc::new(CommandClient::new()),
        settings.registrations.clone(),
    )
    .context("Failed to create collector")?;

    // Fail fast on descriptors the registry would reject
    let descs = collector.describe().context("Invalid metric descriptors")?;
    debug!("Registered {} metric descriptors", descs.len());

    if settings.scrape.pools.is_empty() {
        info!("Enabled pools: all");
    } else {
        info!("Enabled pools: {}", settings.scrape.pools.join(", "));
    }
    info!("Enabled collectors: {}", collector.enabled_collectors().join(", "));
    info!("Scrape deadline: {:?}", settings.scrape.deadline);

    let state = AppState {
        collector: Arc::new(collector),
        telemetry_path: settings.telemetry_path.clone(),
    };
    server::serve(settings.listen_address, state).await
}
