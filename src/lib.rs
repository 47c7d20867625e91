// Re-export modules so they can be used from tests
pub mod cli;
pub mod collector;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod zfs;
