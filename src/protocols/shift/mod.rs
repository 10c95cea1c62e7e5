//! Shift protocol implementation.
//!
//! A tiny framed transform service used to exercise connection handling:
//! - On connect the server sends a single `*` byte.
//! - Bytes between `^` and `$` are echoed back incremented by one.
//! - Everything outside a region, and the markers themselves, is dropped.
//!
//! ## Protocol Format
//!
//! ```text
//! Server:  *
//! Client:  noise^abc$more noise
//! Server:  bcd
//! ```
//!
//! The increment wraps, so `0xFF` comes back as `0x00`. A `^` inside a
//! region is dropped and does not nest; a `$` outside a region is dropped.
//!
//! `parser` is the shared scanner. `handler` serves a connection on the
//! tokio runtime for the pool mode.

pub mod handler;
pub mod parser;

pub use handler::handle_connection;
