//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! Every dispatch ends with a registration update, even when the interest
//! did not change. mio registrations are edge-triggered and the state
//! machine performs a single read or write per event; re-registering makes
//! the poller report a descriptor again if it is still ready.

use crate::config::Config;
use crate::runtime::connection::{Connection, ConnectionRegistry};
use crate::runtime::interest::IoInterest;
use crate::runtime::listener::{create_listener, report_peer_connected, resolve};
use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Connection counters since the server was bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Connections taken into the table.
    pub accepted: u64,
    /// Connections closed at accept time because the table was full.
    pub rejected: u64,
    /// Connections removed from the table, for any reason.
    pub closed: u64,
    /// Closures caused by an I/O or registration failure.
    pub errors: u64,
}

/// Single-threaded multiplexing server.
pub struct Server {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    connections: ConnectionRegistry<TcpStream>,
    /// Receive space shared by all connections; contents never outlive a
    /// single `on_readable` call.
    scratch: Vec<u8>,
    buffer_size: usize,
    stats: Stats,
    /// The last accept round ended on an error with peers possibly still
    /// queued. The listener will not be reported again for them.
    accept_stalled: bool,
}

/// How an accept round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptRound {
    /// The backlog was emptied.
    Drained,
    /// Accepting failed, e.g. for lack of descriptors.
    Stalled,
}

impl Server {
    /// Bind the listener and set up the poller.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let addr = resolve(&config.listen_addr())?;
        let mut listener = TcpListener::from_std(create_listener(addr, true)?);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(config.batch_size),
            listener,
            connections: ConnectionRegistry::new(config.max_connections),
            scratch: vec![0u8; config.buffer_size],
            buffer_size: config.buffer_size,
            stats: Stats::default(),
            accept_stalled: false,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of connections currently in the table.
    #[cfg(test)]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Serve forever. Returns only on a fatal error.
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            self.turn(None)?;
        }
    }

    /// Wait for readiness once and dispatch every event returned.
    ///
    /// `None` waits without a timeout. Errors returned from here are fatal;
    /// per-connection failures are handled by closing the connection.
    pub fn turn(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        let closed_before = self.stats.closed;
        let mut listener_ready = false;

        let registry = self.poll.registry();
        for event in self.events.iter() {
            match event.token() {
                LISTENER_TOKEN => {
                    if event.is_error() {
                        return Err(io::Error::new(
                            io::ErrorKind::Other,
                            "error condition on listening socket",
                        ));
                    }
                    listener_ready = true;
                }
                Token(conn_id) => {
                    match handle_connection_event(
                        conn_id,
                        event,
                        registry,
                        &mut self.connections,
                        &mut self.scratch,
                    ) {
                        Ok(true) => {}
                        Ok(false) => {
                            debug!(conn_id, "Peer closed connection");
                            close_connection(
                                registry,
                                &mut self.connections,
                                conn_id,
                                &mut self.stats,
                            );
                        }
                        Err(e) => {
                            warn!(conn_id, error = %e, "Connection error");
                            self.stats.errors += 1;
                            close_connection(
                                registry,
                                &mut self.connections,
                                conn_id,
                                &mut self.stats,
                            );
                        }
                    }
                }
            }
        }

        // Closed connections released descriptors; retry a stalled backlog.
        let retry = self.accept_stalled && self.stats.closed > closed_before;
        if listener_ready || retry {
            self.accept_pending(TcpListener::accept);
        }

        Ok(())
    }

    /// Run one accept round with `accept` and remember whether it stalled.
    fn accept_pending<F>(&mut self, mut accept: F)
    where
        F: FnMut(&TcpListener) -> io::Result<(TcpStream, SocketAddr)>,
    {
        let Self {
            poll,
            listener,
            connections,
            buffer_size,
            stats,
            accept_stalled,
            ..
        } = self;

        let round = accept_connections(
            || accept(&*listener),
            poll.registry(),
            connections,
            *buffer_size,
            stats,
        );
        *accept_stalled = round == AcceptRound::Stalled;
    }
}

/// Bind a server for `config` and serve until a fatal error.
pub fn run(config: &Config) -> io::Result<()> {
    let mut server = Server::bind(config)?;

    info!(
        addr = %server.local_addr()?,
        max_connections = config.max_connections,
        buffer_size = config.buffer_size,
        "Serving multiplexed connections"
    );

    server.run().map_err(|e| {
        error!(error = %e, stats = ?server.stats(), "Event loop failed");
        e
    })
}

/// Accept every queued connection.
fn accept_connections<F>(
    mut accept: F,
    registry: &Registry,
    connections: &mut ConnectionRegistry<TcpStream>,
    buffer_size: usize,
    stats: &mut Stats,
) -> AcceptRound
where
    F: FnMut() -> io::Result<(TcpStream, SocketAddr)>,
{
    loop {
        match accept() {
            Ok((stream, peer_addr)) => {
                report_peer_connected(&peer_addr);

                let conn_id = match connections.insert(Connection::new(stream, buffer_size)) {
                    Some(id) => id,
                    None => {
                        warn!(peer = %peer_addr, "Connection limit reached");
                        stats.rejected += 1;
                        continue;
                    }
                };
                stats.accepted += 1;

                if let Err(e) = start_connection(registry, connections, conn_id) {
                    warn!(conn_id, error = %e, "Failed to register connection");
                    stats.errors += 1;
                    close_connection(registry, connections, conn_id, stats);
                    continue;
                }

                debug!(
                    conn_id,
                    peer = %peer_addr,
                    active = connections.len(),
                    "Accepted connection"
                );
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return AcceptRound::Drained,
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                ) =>
            {
                continue
            }
            Err(e) => {
                error!(error = %e, "Accept error, retrying after a connection closes");
                return AcceptRound::Stalled;
            }
        }
    }
}

/// Queue the handshake and register the initial interest.
fn start_connection(
    registry: &Registry,
    connections: &mut ConnectionRegistry<TcpStream>,
    conn_id: usize,
) -> io::Result<()> {
    let conn = connections
        .get_mut(conn_id)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;

    let interest = conn.on_connected()?;
    match interest.to_mio() {
        Some(interest) => registry.register(&mut conn.stream, Token(conn_id), interest),
        None => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "new connection wants no readiness",
        )),
    }
}

/// Dispatch one readiness event to its connection.
///
/// Returns `Ok(false)` when the connection should be closed normally.
/// Readable is serviced before writable: output usually exists only
/// because of input just read.
fn handle_connection_event(
    conn_id: usize,
    event: &Event,
    registry: &Registry,
    connections: &mut ConnectionRegistry<TcpStream>,
    scratch: &mut [u8],
) -> io::Result<bool> {
    // Closed earlier in this batch
    if !connections.contains(conn_id) {
        return Ok(true);
    }

    if event.is_error() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            "error condition reported by poller",
        ));
    }

    let conn = connections
        .get_mut(conn_id)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;

    if event.is_readable() || event.is_read_closed() {
        let interest = conn.on_readable(scratch)?;
        if !apply_interest(registry, conn, conn_id, interest)? {
            return Ok(false);
        }
    }

    if event.is_writable() {
        let interest = conn.on_writable()?;
        if !apply_interest(registry, conn, conn_id, interest)? {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Re-register with the new interest. Returns `false` for `IoInterest::None`.
fn apply_interest(
    registry: &Registry,
    conn: &mut Connection<TcpStream>,
    conn_id: usize,
    interest: IoInterest,
) -> io::Result<bool> {
    match interest.to_mio() {
        Some(interest) => {
            registry.reregister(&mut conn.stream, Token(conn_id), interest)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn close_connection(
    registry: &Registry,
    connections: &mut ConnectionRegistry<TcpStream>,
    conn_id: usize,
    stats: &mut Stats,
) {
    if let Some(mut conn) = connections.remove(conn_id) {
        let _ = registry.deregister(&mut conn.stream);
        stats.closed += 1;
        debug!(
            conn_id,
            state = ?conn.state(),
            active = connections.len(),
            "Connection closed"
        );
    }
}
