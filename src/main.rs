//! frameshift: a framed byte-shifting TCP server
//!
//! Every peer receives a `*` on connect. Bytes strictly between a `^` and
//! the next `$` are sent back incremented by one; everything else is
//! dropped.
//!
//! Features:
//! - Single-threaded readiness multiplexing (epoll/kqueue via mio)
//! - Sequential, thread-per-connection and worker-pool alternatives
//! - Configuration via CLI arguments or TOML file

mod config;
mod protocols;
mod runtime;

use config::Config;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Some(raw) = &config.rejected_port {
        warn!(port = %raw, fallback = config.port, "Invalid port argument, using default");
    }

    info!(
        host = %config.host,
        port = config.port,
        mode = ?config.mode,
        max_connections = config.max_connections,
        buffer_size = config.buffer_size,
        "Starting frameshift server"
    );

    if let Err(e) = runtime::run(&config) {
        error!(error = %e, "Server stopped");
        return Err(e.into());
    }

    Ok(())
}
