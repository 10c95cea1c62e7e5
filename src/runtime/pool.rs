//! Worker-pool server mode.
//!
//! Connections are spread over a fixed set of tokio worker threads. A
//! semaphore caps how many are in flight; the acceptor waits for a free
//! slot before taking the next peer.

use crate::config::Config;
use crate::protocols::shift::handle_connection;
use crate::runtime::listener::{create_listener, report_peer_connected, resolve};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// Pause after a failed accept. Failures such as descriptor exhaustion
/// persist until something closes, so retrying at once only spins.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Source of peers for the pool acceptor.
pub trait Accept {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> + Send;
}

impl Accept for TcpListener {
    type Stream = TcpStream;

    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Run the pool server on a dedicated multi-threaded runtime.
pub fn run(config: &Config) -> io::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .thread_name("pool-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let std_listener = create_listener(resolve(&config.listen_addr())?, true)?;
        let listener = TcpListener::from_std(std_listener)?;
        info!(
            addr = %listener.local_addr()?,
            workers = config.workers,
            "Serving connections on worker pool"
        );
        serve(listener, config.max_connections, config.buffer_size).await
    })
}

pub async fn serve<A>(mut listener: A, max_connections: usize, chunk_size: usize) -> io::Result<()>
where
    A: Accept + Send,
{
    let connection_limit = Arc::new(Semaphore::new(max_connections));

    loop {
        // Wait for a connection slot
        let permit = connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        match listener.accept().await {
            Ok((stream, peer)) => {
                report_peer_connected(&peer);

                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, chunk_size).await {
                        debug!(peer = %peer, error = %e, "Connection error");
                    }
                    info!(peer = %peer, "Peer done");
                    drop(permit);
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
                drop(permit);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::time::Instant;

    /// Fails `failures` times, then hands out one in-memory stream and
    /// never yields another peer.
    struct FlakyAcceptor {
        failures: usize,
        stream: Option<DuplexStream>,
        attempts: Arc<Mutex<Vec<Instant>>>,
    }

    impl Accept for FlakyAcceptor {
        type Stream = DuplexStream;

        fn accept(
            &mut self,
        ) -> impl Future<Output = io::Result<(DuplexStream, SocketAddr)>> + Send {
            self.attempts.lock().unwrap().push(Instant::now());
            let next = if self.failures > 0 {
                self.failures -= 1;
                // EMFILE
                Some(Err(io::Error::from_raw_os_error(24)))
            } else {
                self.stream
                    .take()
                    .map(|s| Ok((s, SocketAddr::from(([127, 0, 0, 1], 1)))))
            };

            async move {
                match next {
                    Some(result) => result,
                    None => std::future::pending().await,
                }
            }
        }
    }

    async fn start(max_connections: usize) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, max_connections, 1024));
        addr
    }

    #[tokio::test]
    async fn test_pool_transforms_frames() {
        let addr = start(4).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        let mut buf = [0u8; 1];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"*");

        client.write_all(b"noise^abc$more").await.unwrap();
        let mut out = [0u8; 3];
        client.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"bcd");
    }

    #[tokio::test]
    async fn test_pool_slot_released_on_close() {
        let addr = start(1).await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 1];
        first.read_exact(&mut buf).await.unwrap();
        drop(first);

        // The only slot frees up once the first peer is gone.
        let mut second = TcpStream::connect(addr).await.unwrap();
        second.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"*");
    }

    #[tokio::test]
    async fn test_accept_errors_back_off() {
        let (mut client, server_end) = tokio::io::duplex(64);
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let acceptor = FlakyAcceptor {
            failures: 2,
            stream: Some(server_end),
            attempts: Arc::clone(&attempts),
        };
        tokio::spawn(serve(acceptor, 4, 64));

        // Served once the failures have been waited out.
        let mut buf = [0u8; 1];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"*");

        let attempts = attempts.lock().unwrap();
        assert!(attempts.len() >= 3);
        for pair in attempts[..3].windows(2) {
            assert!(pair[1] - pair[0] >= ACCEPT_BACKOFF);
        }
    }
}
