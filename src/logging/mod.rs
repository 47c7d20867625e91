use anyhow::Result;
use chrono::Local;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;

/// Set up logging based on verbosity level.
///
/// In dev mode logs also go to `zfs_exporter_dev_<timestamp>.log`. The returned
/// guard must be kept alive for the file writer to flush.
pub fn setup_logger(verbosity: u8, dev: bool) -> Result<Option<WorkerGuard>> {
    let log_level = get_log_level(verbosity);

    if dev {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let log_file_path = dev_log_file_name(&timestamp);
        println!("Development mode enabled. Logs will be written to: {}", log_file_path);

        let file_appender = tracing_appender::rolling::never("", &log_file_path);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_ansi(false) // No colors in log file
            .with_writer(non_blocking)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
        return Ok(Some(guard));
    }

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    Ok(None)
}

/// Get the appropriate log level based on verbosity
pub fn get_log_level(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

pub fn dev_log_file_name(timestamp: &str) -> String {
    format!("zfs_exporter_dev_{}.log", timestamp)
}
