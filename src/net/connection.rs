//! Client connections and their lifecycle tracking.
//!
//! # Responsibilities
//! - Wrap the accepted socket in a buffered, peekable [`ClientConnection`]
//! - Promote a plain connection to TLS without mutating it in place
//! - Generate unique connection IDs for tracing
//! - Count live connections so shutdown can drain them

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_rustls::TlsAcceptor;

use crate::certs::CertificateHandle;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is enough since we only need uniqueness.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Any byte stream a client connection can run over.
pub trait ClientIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ClientIo for T {}

type BoxedIo = Box<dyn ClientIo>;

/// Size of the read buffer in front of the socket.
const READ_BUFFER: usize = 16 * 1024;

/// A client connection, either plaintext or TLS-terminated.
///
/// Reads go through a buffer so the first byte can be peeked without being
/// consumed. Promotion to TLS consumes the plain view and hands back a new
/// one; bytes still sitting in the buffer are fed to the handshake.
pub struct ClientConnection {
    io: BufReader<BoxedIo>,
    tls: bool,
}

impl ClientConnection {
    /// Wrap a freshly accepted plaintext stream.
    pub fn new(io: impl ClientIo + 'static) -> Self {
        Self {
            io: BufReader::with_capacity(READ_BUFFER, Box::new(io)),
            tls: false,
        }
    }

    /// Whether reads and writes are currently TLS-decrypted/encrypted.
    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// `https` on a promoted connection, `http` otherwise.
    pub fn scheme(&self) -> &'static str {
        if self.tls {
            "https"
        } else {
            "http"
        }
    }

    /// Buffered reader over the decrypted stream.
    pub fn reader(&mut self) -> &mut (impl AsyncBufRead + Unpin + Send) {
        &mut self.io
    }

    /// Writer handed to forwarding backends as the response sink.
    pub fn sink(&mut self) -> &mut (dyn AsyncWrite + Send + Unpin) {
        &mut self.io
    }

    /// Look at the next byte without consuming it. `None` at end of stream.
    pub async fn peek_byte(&mut self) -> std::io::Result<Option<u8>> {
        let buf = self.io.fill_buf().await?;
        Ok(buf.first().copied())
    }

    pub async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.io.write_all(data).await
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        self.io.flush().await
    }

    /// Run the server side of a TLS handshake over this connection.
    ///
    /// On success the returned connection reads plaintext from the TLS
    /// session. On failure the underlying socket is dropped.
    pub async fn promote_to_tls(self, config: CertificateHandle) -> std::io::Result<Self> {
        let acceptor = TlsAcceptor::from(config);
        let stream = acceptor.accept(self.io).await?;
        Ok(Self {
            io: BufReader::with_capacity(READ_BUFFER, Box::new(stream)),
            tls: true,
        })
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("tls", &self.tls)
            .field("buffered", &self.io.buffer().len())
            .finish()
    }
}

/// Tracks active connections for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        metrics::gauge!("proxy_active_connections").increment(1.0);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until every connection has closed or `limit` elapses.
    ///
    /// Returns the number of connections still open.
    pub async fn wait_for_drain(&self, limit: Duration) -> u64 {
        let deadline = tokio::time::Instant::now() + limit;
        while self.active_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.active_count()
    }
}

/// Guard that tracks a connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        metrics::gauge!("proxy_active_connections").decrement(1.0);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}
