//! Listening socket bootstrap shared by every server mode.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use tracing::info;

/// Pending-connection queue length passed to `listen(2)`.
const BACKLOG: i32 = 64;

/// Resolve `addr` to the first socket address it names.
pub fn resolve(addr: &str) -> io::Result<SocketAddr> {
    addr.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no address found for {addr}"),
        )
    })
}

/// Create a TCP listener with SO_REUSEADDR so a restarted server can bind
/// while old connections sit in TIME_WAIT.
pub fn create_listener(addr: SocketAddr, nonblocking: bool) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(nonblocking)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}

/// Emit the connection notice for a newly accepted peer.
pub fn report_peer_connected(peer: &SocketAddr) {
    info!(peer = %peer, "Peer connected");
}
