//! Loopback client for requests addressed to this machine.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::Method;
use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::forward::{is_hop_by_hop, ForwardError, LocalResponse, LoopbackClient};
use crate::http::request::Headers;

/// Loopback client over hyper's pooled HTTP/1 client.
#[derive(Clone)]
pub struct HyperLoopbackClient {
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl HyperLoopbackClient {
    /// `timeout` bounds the whole exchange, including reading the body.
    pub fn new(timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeout));
        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
            timeout,
        }
    }

    async fn exchange(
        &self,
        method: &Method,
        path: &str,
        headers: &Headers,
        payload: Bytes,
    ) -> Result<LocalResponse, ForwardError> {
        let uri = if path.starts_with('/') {
            let host = headers
                .get("Host")
                .ok_or_else(|| ForwardError::InvalidRequest("loopback request without Host".into()))?;
            format!("http://{host}{path}")
        } else {
            path.to_string()
        };

        let mut builder = Request::builder().method(method.clone()).uri(&uri);
        for (name, value) in headers.iter() {
            if is_hop_by_hop(name) {
                continue;
            }
            builder = builder.header(name, value);
        }
        let request = builder
            .body(Full::new(payload))
            .map_err(|e| ForwardError::InvalidRequest(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| ForwardError::Upstream(e.to_string()))?;

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| ForwardError::Upstream(e.to_string()))?
            .to_bytes();

        let mut headers = parts.headers;
        headers.remove(TRANSFER_ENCODING);
        // a HEAD answer advertises the length of a body it never sends
        if *method != Method::HEAD || !headers.contains_key(CONTENT_LENGTH) {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        }

        Ok(LocalResponse {
            status: parts.status.as_u16(),
            headers,
            body,
        })
    }
}

impl std::fmt::Debug for HyperLoopbackClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperLoopbackClient")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl LoopbackClient for HyperLoopbackClient {
    async fn request(
        &self,
        method: &Method,
        path: &str,
        headers: &Headers,
        payload: Bytes,
    ) -> Result<LocalResponse, ForwardError> {
        tokio::time::timeout(self.timeout, self.exchange(method, path, headers, payload))
            .await
            .map_err(|_| ForwardError::Timeout(path.to_string()))?
    }
}
