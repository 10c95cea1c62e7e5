//! Blocking server modes.
//!
//! Both modes run the same per-connection loop with ordinary blocking
//! sockets. `sequential` serves one peer at a time on the calling thread;
//! `threaded` hands each peer to a dedicated OS thread.

use crate::config::Config;
use crate::protocols::shift::parser::{self, FrameState, HANDSHAKE};
use crate::runtime::listener::{create_listener, report_peer_connected, resolve};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use tracing::{debug, info, warn};

/// Serve one connection until the peer closes it.
pub fn serve_connection<S: Read + Write>(stream: &mut S, chunk_size: usize) -> io::Result<()> {
    stream.write_all(&[HANDSHAKE])?;

    let mut state = FrameState::default();
    let mut input = vec![0u8; chunk_size];
    let mut output = Vec::with_capacity(chunk_size);

    loop {
        let n = match stream.read(&mut input) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        output.clear();
        if parser::transform_into(&mut state, &input[..n], &mut output) > 0 {
            stream.write_all(&output)?;
        }
    }
}

/// Bind from `config` and serve peers one after another.
pub fn run_sequential(config: &Config) -> io::Result<()> {
    let listener = bind(config)?;
    info!(addr = %listener.local_addr()?, "Serving connections sequentially");
    serve_sequential(&listener, config.buffer_size)
}

/// Bind from `config` and serve each peer on its own thread.
pub fn run_threaded(config: &Config) -> io::Result<()> {
    let listener = bind(config)?;
    info!(addr = %listener.local_addr()?, "Serving one thread per connection");
    serve_threaded(&listener, config.buffer_size)
}

fn bind(config: &Config) -> io::Result<TcpListener> {
    create_listener(resolve(&config.listen_addr())?, false)
}

pub fn serve_sequential(listener: &TcpListener, chunk_size: usize) -> io::Result<()> {
    loop {
        let (mut stream, peer) = accept(listener)?;
        if let Err(e) = serve_connection(&mut stream, chunk_size) {
            warn!(peer = %peer, error = %e, "Connection error");
        }
        info!(peer = %peer, "Peer done");
    }
}

pub fn serve_threaded(listener: &TcpListener, chunk_size: usize) -> io::Result<()> {
    let mut next_id: u64 = 0;
    loop {
        let (mut stream, peer) = accept(listener)?;
        next_id += 1;

        thread::Builder::new()
            .name(format!("conn-{next_id}"))
            .spawn(move || {
                debug!(peer = %peer, "Connection thread started");
                if let Err(e) = serve_connection(&mut stream, chunk_size) {
                    warn!(peer = %peer, error = %e, "Connection error");
                }
                info!(peer = %peer, "Peer done");
            })?;
    }
}

/// Accept the next peer, retrying on errors that only affect that peer.
fn accept(listener: &TcpListener) -> io::Result<(TcpStream, SocketAddr)> {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                report_peer_connected(&peer);
                return Ok((stream, peer));
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                ) => {}
            Err(e) => return Err(e),
        }
    }
}
