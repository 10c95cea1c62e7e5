//! Server runtimes.
//!
//! The multiplexed mode is the primary one: a single thread drives every
//! connection through mio readiness events, with each connection's state
//! machine deciding which readiness it wants next.
//!
//! Alternatives sharing the same framing rules:
//! - `sequential`: one blocking connection at a time
//! - `threaded`: one OS thread per connection
//! - `pool`: tokio worker pool with a connection cap

mod blocking;
mod buffer;
mod connection;
mod interest;
mod listener;
mod mio_impl;
mod pool;

use crate::config::{Config, ServerMode};

/// Run the server in the configured mode. Returns only on a fatal error.
pub fn run(config: &Config) -> std::io::Result<()> {
    match config.mode {
        ServerMode::Multiplexed => mio_impl::run(config),
        ServerMode::Sequential => blocking::run_sequential(config),
        ServerMode::Threaded => blocking::run_threaded(config),
        ServerMode::Pool => pool::run(config),
    }
}
