//! Per-connection error taxonomy.
//!
//! Every failure a connection task can hit maps onto one variant here. None
//! of them escape the task that owns the connection: the accept loop only
//! logs them.

use thiserror::Error;

use crate::certs::CertificateError;

/// Errors raised while serving one client connection.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Socket read or write failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection closed before the declared body was complete.
    /// `expected` is unknown when a chunked body ends between chunks.
    #[error("body truncated after {received} bytes")]
    TruncatedBody { expected: Option<u64>, received: u64 },

    /// A chunk size line did not start with a hex token.
    #[error("malformed chunk header: {0:?}")]
    MalformedChunkHeader(String),

    /// CONNECT to a port other than 80 or 443.
    #[error("CONNECT to unsupported port {0}")]
    UnsupportedTunnelPort(u16),

    /// The server side of the intercepted TLS handshake failed.
    #[error("tls handshake with client for {host} failed: {reason}")]
    TlsHandshake {
        host: String,
        reason: String,
        /// The client refused the presented certificate.
        certificate_rejected: bool,
    },

    /// Method the upstream agent cannot carry.
    #[error("method {0} not supported on the agent path")]
    UnsupportedMethod(String),

    /// The certificate collaborator could not produce a server context.
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// Unparseable request head, target, or framing header.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Declared or decoded body exceeds the configured limit.
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
}

impl ProxyError {
    pub(crate) fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Whether the peer simply went away; such errors are not worth a warning.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProxyError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

pub type Result<T, E = ProxyError> = std::result::Result<T, E>;
