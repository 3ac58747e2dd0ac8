//! Direct forwarding to the destination over a fresh TLS connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::forward::{
    encode_request, relay_until_eof, DirectForwarder, ForwardError, ForwardOutcome, ForwardRequest,
    ResponseSink,
};
use crate::http::request::split_host_port;
use crate::net::tls::webpki_client_config;
use crate::observability::metrics;

/// Opens one TLS connection per request, verified against the web PKI.
#[derive(Clone)]
pub struct TlsDirectForwarder {
    connector: TlsConnector,
    default_port: u16,
    connect_timeout: Duration,
}

impl TlsDirectForwarder {
    pub fn new(default_port: u16, connect_timeout: Duration) -> Result<Self, rustls::Error> {
        Ok(Self::with_client_config(
            Arc::new(webpki_client_config()?),
            default_port,
            connect_timeout,
        ))
    }

    /// Use a custom client context, e.g. one trusting a private root.
    pub fn with_client_config(
        config: Arc<rustls::ClientConfig>,
        default_port: u16,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            connector: TlsConnector::from(config),
            default_port,
            connect_timeout,
        }
    }

    async fn forward(&self, request: &ForwardRequest, sink: ResponseSink<'_>) -> Result<u64, ForwardError> {
        let (host, port) = split_host_port(&request.host);
        let port = port.unwrap_or(self.default_port);

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| ForwardError::InvalidRequest(format!("{host}: {e}")))?;

        let tcp = tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| ForwardError::Timeout(format!("{host}:{port}")))??;
        let _ = tcp.set_nodelay(true);

        let mut tls = self.connector.connect(server_name, tcp).await?;
        tls.write_all(&encode_request(request, &request.path)).await?;
        tls.flush().await?;

        Ok(relay_until_eof(&mut tls, sink).await?)
    }
}

impl std::fmt::Debug for TlsDirectForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsDirectForwarder")
            .field("default_port", &self.default_port)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

#[async_trait]
impl DirectForwarder for TlsDirectForwarder {
    async fn handle(&self, request: &ForwardRequest, sink: ResponseSink<'_>) -> ForwardOutcome {
        match self.forward(request, sink).await {
            Ok(bytes) => {
                tracing::debug!(url = %request.url, bytes, "Direct response relayed");
                ForwardOutcome::Relayed
            }
            Err(e) => {
                metrics::record_forward_failure("direct");
                tracing::warn!(url = %request.url, error = %e, "Direct forward failed");
                ForwardOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::Method;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn unreachable_destination_fails() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let forwarder = TlsDirectForwarder::new(443, Duration::from_secs(2)).unwrap();
        let request = ForwardRequest {
            method: Method::GET,
            host: addr.to_string(),
            url: format!("https://{addr}/"),
            path: "/".to_string(),
            headers: Default::default(),
            payload: Bytes::new(),
        };
        let mut sink = Vec::new();

        assert_eq!(forwarder.handle(&request, &mut sink).await, ForwardOutcome::Failed);
        assert!(sink.is_empty());
    }
}
