//! Forwarding collaborators.
//!
//! # Data Flow
//! ```text
//! Dispatcher
//!     → LoopbackClient   (LOCAL route; response handed back as data)
//!     → DirectForwarder  (DIRECT route, https only; writes to the sink)
//!     → AgentForwarder   (AGENT route; may fall back to direct)
//! ```
//!
//! Direct and agent backends write the response straight onto the client
//! sink and report only whether they succeeded. `Failed` and `Relayed`
//! outcomes make the dispatcher close the connection after the
//! transaction.

pub mod agent;
pub mod direct;
pub mod local;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::request::Headers;
use crate::http::response::https_redirect;

pub use agent::UpstreamProxyForwarder;
pub use direct::TlsDirectForwarder;
pub use local::HyperLoopbackClient;

/// Response sink handed to forwarding backends.
pub type ResponseSink<'a> = &'a mut (dyn AsyncWrite + Send + Unpin);

/// A fully read request ready to be forwarded.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    /// Destination authority (`host[:port]`).
    pub host: String,
    /// Absolute URL.
    pub url: String,
    /// Path and query.
    pub path: String,
    pub headers: Headers,
    pub payload: Bytes,
}

impl ForwardRequest {
    pub fn is_https(&self) -> bool {
        self.url
            .get(..6)
            .map(|s| s.eq_ignore_ascii_case("https:"))
            .unwrap_or(false)
    }
}

/// Result of handing a request to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// A self-delimiting response was written; the connection may be reused.
    Ok,
    /// The upstream response was relayed until the upstream closed. Its end
    /// may only be marked by that close, so the client connection must
    /// close too.
    Relayed,
    Failed,
}

impl ForwardOutcome {
    /// Whether the client connection must close after this response.
    pub fn closes_connection(self) -> bool {
        !matches!(self, ForwardOutcome::Ok)
    }
}

/// Response returned by the loopback client.
#[derive(Debug, Clone)]
pub struct LocalResponse {
    pub status: u16,
    /// Kept as a multimap so repeated `Set-Cookie` lines survive.
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("timed out connecting to {0}")]
    Timeout(String),
}

/// Issues requests to services on this machine.
#[async_trait]
pub trait LoopbackClient: Send + Sync {
    /// `path` is the request target as received (origin or absolute form).
    async fn request(
        &self,
        method: &Method,
        path: &str,
        headers: &Headers,
        payload: Bytes,
    ) -> Result<LocalResponse, ForwardError>;
}

/// Forwards `https` requests straight to the destination.
#[async_trait]
pub trait DirectForwarder: Send + Sync {
    async fn handle(&self, request: &ForwardRequest, sink: ResponseSink<'_>) -> ForwardOutcome;
}

/// Forwards requests through the upstream tunnel backend.
#[async_trait]
pub trait AgentForwarder: Send + Sync {
    /// `fallback` lets the agent hand a request it cannot carry to the
    /// direct path.
    async fn handle(
        &self,
        request: &ForwardRequest,
        sink: ResponseSink<'_>,
        fallback: &DirectFallback<'_>,
    ) -> ForwardOutcome;
}

/// The direct path as seen by the agent backend.
///
/// Plain `http` URLs are redirected to `https` without contacting any
/// backend; everything else goes to the direct forwarder.
#[derive(Clone, Copy)]
pub struct DirectFallback<'a> {
    direct: &'a dyn DirectForwarder,
}

impl<'a> DirectFallback<'a> {
    pub fn new(direct: &'a dyn DirectForwarder) -> Self {
        Self { direct }
    }

    pub async fn forward(&self, request: &ForwardRequest, sink: ResponseSink<'_>) -> ForwardOutcome {
        if !request.is_https() {
            tracing::debug!(url = %request.url, "Redirecting plain http to https");
            let redirect = https_redirect(&request.url);
            return match write_and_flush(sink, &redirect).await {
                Ok(()) => ForwardOutcome::Ok,
                Err(_) => ForwardOutcome::Failed,
            };
        }
        self.direct.handle(request, sink).await
    }
}

async fn write_and_flush(sink: ResponseSink<'_>, data: &[u8]) -> std::io::Result<()> {
    sink.write_all(data).await?;
    sink.flush().await
}

/// Connection-scoped headers never copied onto a forwarded request.
const HOP_BY_HOP: [&str; 9] = [
    "Connection",
    "Proxy-Connection",
    "Keep-Alive",
    "Proxy-Authorization",
    "Te",
    "Trailer",
    "Transfer-Encoding",
    "Upgrade",
    "Content-Length",
];

pub(crate) fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Serialise an HTTP/1.1 request for an upstream that closes after one
/// response. The body is always sent with `Content-Length`.
pub(crate) fn encode_request(request: &ForwardRequest, target: &str) -> Vec<u8> {
    let mut out = format!("{} {} HTTP/1.1\r\n", request.method, target).into_bytes();
    if !request.headers.contains("Host") {
        out.extend_from_slice(format!("Host: {}\r\n", request.host).as_bytes());
    }
    for (name, value) in request.headers.iter() {
        if is_hop_by_hop(name) {
            continue;
        }
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    let sends_body = !request.payload.is_empty()
        || matches!(request.method, Method::POST | Method::PUT | Method::PATCH);
    if sends_body {
        out.extend_from_slice(format!("Content-Length: {}\r\n", request.payload.len()).as_bytes());
    }
    out.extend_from_slice(b"Connection: close\r\n\r\n");
    out.extend_from_slice(&request.payload);
    out
}

/// Relay everything the upstream sends until it closes.
///
/// A TLS peer that closes without `close_notify` still counts as a clean
/// end of response.
pub(crate) async fn relay_until_eof<R>(upstream: &mut R, sink: ResponseSink<'_>) -> std::io::Result<u64>
where
    R: tokio::io::AsyncRead + Unpin + ?Sized,
{
    use tokio::io::AsyncReadExt;

    let mut buf = vec![0u8; 16 * 1024];
    let mut total = 0u64;
    loop {
        let n = match upstream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };
        sink.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    sink.flush().await?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDirect(AtomicUsize);

    #[async_trait]
    impl DirectForwarder for CountingDirect {
        async fn handle(&self, _request: &ForwardRequest, sink: ResponseSink<'_>) -> ForwardOutcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            let _ = sink.write_all(b"HTTP/1.1 204 No Content\r\n\r\n").await;
            ForwardOutcome::Ok
        }
    }

    fn request(url: &str) -> ForwardRequest {
        ForwardRequest {
            method: Method::POST,
            host: "www.google.com".to_string(),
            url: url.to_string(),
            path: "/submit".to_string(),
            headers: [("host", "www.google.com"), ("connection", "keep-alive"), ("transfer-encoding", "chunked")]
                .into_iter()
                .collect(),
            payload: Bytes::from_static(b"a=1"),
        }
    }

    #[tokio::test]
    async fn fallback_redirects_plain_http_without_backend() {
        let direct = CountingDirect(AtomicUsize::new(0));
        let mut sink = Vec::new();

        let outcome = DirectFallback::new(&direct)
            .forward(&request("http://www.google.com/submit"), &mut sink)
            .await;

        assert_eq!(outcome, ForwardOutcome::Ok);
        assert_eq!(direct.0.load(Ordering::SeqCst), 0);
        assert!(String::from_utf8(sink).unwrap().starts_with("HTTP/1.1 301 "));
    }

    #[tokio::test]
    async fn fallback_sends_https_to_direct() {
        let direct = CountingDirect(AtomicUsize::new(0));
        let mut sink = Vec::new();

        let outcome = DirectFallback::new(&direct)
            .forward(&request("https://www.google.com/submit"), &mut sink)
            .await;

        assert_eq!(outcome, ForwardOutcome::Ok);
        assert_eq!(direct.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn encoded_request_is_dechunked_and_closes() {
        let encoded = String::from_utf8(encode_request(&request("https://www.google.com/submit"), "/submit")).unwrap();

        assert!(encoded.starts_with("POST /submit HTTP/1.1\r\n"));
        assert!(encoded.contains("Host: www.google.com\r\n"));
        assert!(encoded.contains("Content-Length: 3\r\n"));
        assert!(encoded.contains("Connection: close\r\n"));
        assert!(!encoded.contains("Transfer-Encoding"));
        assert!(!encoded.contains("keep-alive"));
        assert!(encoded.ends_with("\r\n\r\na=1"));
    }

    #[tokio::test]
    async fn relay_copies_until_eof() {
        let mut upstream: &[u8] = b"HTTP/1.1 200 OK\r\n\r\nbody";
        let mut sink = Vec::new();
        let copied = relay_until_eof(&mut upstream, &mut sink).await.unwrap();
        assert_eq!(copied, 23);
        assert_eq!(sink, b"HTTP/1.1 200 OK\r\n\r\nbody");
    }

    #[test]
    fn only_plain_ok_keeps_connection() {
        assert!(!ForwardOutcome::Ok.closes_connection());
        assert!(ForwardOutcome::Relayed.closes_connection());
        assert!(ForwardOutcome::Failed.closes_connection());
    }
}
