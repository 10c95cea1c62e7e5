//! mio-based event loop implementation.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS).
//! One thread owns every connection.

mod event_loop;

use crate::config::Config;

/// Run the server using mio backend.
pub fn run(config: &Config) -> std::io::Result<()> {
    event_loop::run(config)
}
