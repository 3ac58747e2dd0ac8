//! Agent forwarding through an upstream HTTP proxy.
//!
//! The upstream is expected to carry the request to the tunnel backend. If
//! none is configured, or it cannot be reached, the request takes the
//! direct path instead.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::forward::{
    encode_request, relay_until_eof, AgentForwarder, DirectFallback, ForwardError, ForwardOutcome,
    ForwardRequest, ResponseSink,
};
use crate::observability::metrics;

#[derive(Debug, Clone)]
pub struct UpstreamProxyForwarder {
    upstream: Option<String>,
    connect_timeout: Duration,
}

impl UpstreamProxyForwarder {
    pub fn new(upstream: Option<String>, connect_timeout: Duration) -> Self {
        Self {
            upstream: upstream.filter(|u| !u.trim().is_empty()),
            connect_timeout,
        }
    }

    pub fn upstream(&self) -> Option<&str> {
        self.upstream.as_deref()
    }

    async fn connect(&self, upstream: &str) -> Result<TcpStream, ForwardError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(upstream))
            .await
            .map_err(|_| ForwardError::Timeout(upstream.to_string()))??;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }

    async fn relay(
        &self,
        mut stream: TcpStream,
        request: &ForwardRequest,
        sink: ResponseSink<'_>,
    ) -> Result<u64, ForwardError> {
        stream.write_all(&encode_request(request, &request.url)).await?;
        stream.flush().await?;
        Ok(relay_until_eof(&mut stream, sink).await?)
    }
}

#[async_trait]
impl AgentForwarder for UpstreamProxyForwarder {
    async fn handle(
        &self,
        request: &ForwardRequest,
        sink: ResponseSink<'_>,
        fallback: &DirectFallback<'_>,
    ) -> ForwardOutcome {
        let Some(upstream) = self.upstream.as_deref() else {
            return fallback.forward(request, sink).await;
        };

        let stream = match self.connect(upstream).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(upstream, error = %e, "Agent upstream unreachable, going direct");
                return fallback.forward(request, sink).await;
            }
        };

        match self.relay(stream, request, sink).await {
            Ok(bytes) => {
                tracing::debug!(url = %request.url, bytes, "Agent response relayed");
                ForwardOutcome::Relayed
            }
            Err(e) => {
                metrics::record_forward_failure("agent");
                tracing::warn!(url = %request.url, error = %e, "Agent forward failed");
                ForwardOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use http::Method;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use crate::forward::DirectForwarder;

    struct CountingDirect(AtomicUsize);

    #[async_trait]
    impl DirectForwarder for CountingDirect {
        async fn handle(&self, _request: &ForwardRequest, _sink: ResponseSink<'_>) -> ForwardOutcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            ForwardOutcome::Ok
        }
    }

    fn request() -> ForwardRequest {
        ForwardRequest {
            method: Method::GET,
            host: "www.youtube.com".to_string(),
            url: "https://www.youtube.com/watch?v=1".to_string(),
            path: "/watch?v=1".to_string(),
            headers: [("Host", "www.youtube.com")].into_iter().collect(),
            payload: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn without_upstream_uses_fallback() {
        let direct = CountingDirect(AtomicUsize::new(0));
        let agent = UpstreamProxyForwarder::new(None, Duration::from_secs(1));
        let mut sink = Vec::new();

        let outcome = agent
            .handle(&request(), &mut sink, &DirectFallback::new(&direct))
            .await;

        assert_eq!(outcome, ForwardOutcome::Ok);
        assert_eq!(direct.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sends_absolute_form_to_upstream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = stream.read(&mut buf).await.unwrap();
            stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await.unwrap();
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });

        let direct = CountingDirect(AtomicUsize::new(0));
        let agent = UpstreamProxyForwarder::new(Some(addr.to_string()), Duration::from_secs(2));
        let mut sink = Vec::new();

        let outcome = agent
            .handle(&request(), &mut sink, &DirectFallback::new(&direct))
            .await;

        assert_eq!(outcome, ForwardOutcome::Relayed);
        assert_eq!(direct.0.load(Ordering::SeqCst), 0);
        assert!(server
            .await
            .unwrap()
            .starts_with("GET https://www.youtube.com/watch?v=1 HTTP/1.1\r\n"));
        assert_eq!(sink, b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
    }
}
