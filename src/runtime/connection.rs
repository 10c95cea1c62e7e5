//! Connection state machine for multiplexed connections.
//!
//! Each connection owns its socket, its protocol state and a bounded output
//! buffer. The readiness callbacks never block: they perform at most one
//! `read` or `write` and report which readiness they want next.
//!
//! A connection is never read from while it has unsent output. That keeps
//! the output buffer bounded by a single receive no matter how fast the peer
//! sends.

use crate::protocols::shift::parser::{self, FrameState, HANDSHAKE};
use crate::runtime::buffer::OutputBuffer;
use crate::runtime::interest::IoInterest;
use slab::Slab;
use std::io::{self, Read, Write};

/// Current protocol state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Handshake byte queued but not fully sent. Nothing is read yet.
    AwaitingHandshakeAck,
    /// Handshake delivered; input is scanned for frames.
    Framing(FrameState),
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection<S> {
    pub stream: S,
    state: ConnState,
    output: OutputBuffer,
}

impl<S> Connection<S> {
    /// Create a connection with an output buffer of `buffer_size` bytes.
    pub fn new(stream: S, buffer_size: usize) -> Self {
        Self {
            stream,
            state: ConnState::AwaitingHandshakeAck,
            output: OutputBuffer::new(buffer_size),
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Queue the handshake byte. The connection first wants to write.
    pub fn on_connected(&mut self) -> io::Result<IoInterest> {
        self.state = ConnState::AwaitingHandshakeAck;
        self.output.push(HANDSHAKE)?;
        Ok(IoInterest::WriteOnly)
    }
}

impl<S: Read> Connection<S> {
    /// Handle read readiness.
    ///
    /// `scratch` is transient receive space shared by all connections. At
    /// most `min(scratch.len(), free output space)` bytes are read, so the
    /// transformed bytes always fit.
    ///
    /// Returns `IoInterest::None` when the peer has closed its write side.
    pub fn on_readable(&mut self, scratch: &mut [u8]) -> io::Result<IoInterest> {
        let mut frame = match self.state {
            ConnState::AwaitingHandshakeAck => return Ok(IoInterest::WriteOnly),
            ConnState::Framing(_) if self.output.has_pending() => {
                return Ok(IoInterest::WriteOnly)
            }
            ConnState::Framing(frame) => frame,
        };

        let limit = scratch.len().min(self.output.free());
        let n = match self.stream.read(&mut scratch[..limit]) {
            Ok(0) => return Ok(IoInterest::None),
            Ok(n) => n,
            Err(ref e) if is_transient(e) => return Ok(IoInterest::ReadOnly),
            Err(e) => return Err(e),
        };

        let mut queued = false;
        for &byte in &scratch[..n] {
            if let Some(out) = parser::step(&mut frame, byte) {
                self.output.push(out)?;
                queued = true;
            }
        }
        self.state = ConnState::Framing(frame);

        Ok(IoInterest::from_wants(!queued, queued))
    }
}

impl<S: Write> Connection<S> {
    /// Handle write readiness.
    ///
    /// With nothing queued this re-arms for reading; it never asks for the
    /// connection to be closed.
    pub fn on_writable(&mut self) -> io::Result<IoInterest> {
        if !self.output.has_pending() {
            return Ok(IoInterest::ReadOnly);
        }

        let n = match self.stream.write(self.output.pending()) {
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
            }
            Ok(n) => n,
            Err(ref e) if is_transient(e) => return Ok(IoInterest::WriteOnly),
            Err(e) => return Err(e),
        };

        self.output.consume(n);
        if self.output.has_pending() {
            // Partial write, continue
            return Ok(IoInterest::WriteOnly);
        }

        if self.state == ConnState::AwaitingHandshakeAck {
            self.state = ConnState::Framing(FrameState::AwaitingMessageStart);
        }
        Ok(IoInterest::ReadOnly)
    }
}

/// Errors that mean "try again on the next readiness event".
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Registry of active connections using slab allocation.
///
/// Ids are stable until the connection is removed; a removed id may be
/// handed out again by a later insert.
pub struct ConnectionRegistry<S> {
    connections: Slab<Connection<S>>,
    max_connections: usize,
}

impl<S> ConnectionRegistry<S> {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::new(),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection<S>) -> Option<usize> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    /// Get a mutable reference to a connection.
    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection<S>> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, id: usize) -> Option<Connection<S>> {
        self.connections.try_remove(id)
    }

    /// Check if a connection exists.
    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }
}
