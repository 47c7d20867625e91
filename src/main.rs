use anyhow::Result;
use zfs_exporter::{cli, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse_args();

    // Keep the guard alive so the dev log file is flushed on exit
    let _guard = logging::setup_logger(args.verbosity, args.dev)?;

    cli::run(args).await
}
