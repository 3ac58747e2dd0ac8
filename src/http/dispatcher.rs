//! Per-connection request dispatcher.
//!
//! # State Machine
//! ```text
//! AwaitingRequestLine ──CONNECT──▶ Tunnel ──promoted/plaintext──▶ AwaitingRequestLine
//!        │                           └──closed──▶ Done
//!        ▼
//!   Transaction: ParsingTarget → RouteDecision
//!        → LocalForward | SelfCheck | Preflight | DirectForward | AgentForward
//!        ──keep-alive──▶ AwaitingRequestLine
//!        ──close──▶ Done
//! ```
//!
//! Transactions on one connection run strictly one after another. Each one
//! starts from a fresh [`RequestContext`].

use std::sync::Arc;
use std::time::Duration;

use http::Method;
use tracing::{debug, info, warn};

use crate::certs::CertificateProvider;
use crate::config::LimitsConfig;
use crate::error::{ProxyError, Result};
use crate::forward::{
    AgentForwarder, DirectFallback, DirectForwarder, ForwardRequest, LoopbackClient,
};
use crate::http::request::{RequestContext, RequestHead};
use crate::http::response::{
    self, BAD_REQUEST, NOT_FOUND, PAYLOAD_TOO_LARGE, SELF_CHECK_RESPONSE,
};
use crate::net::connection::ClientConnection;
use crate::net::intercept::{establish_tunnel, TunnelOutcome};
use crate::observability::metrics;
use crate::routing::{decide, LocalAddressClassifier, Route, RoutingRuleSet};

/// Backends and certificate source shared by every connection.
#[derive(Clone)]
pub struct Collaborators {
    pub loopback: Arc<dyn LoopbackClient>,
    pub direct: Arc<dyn DirectForwarder>,
    pub agent: Arc<dyn AgentForwarder>,
    pub certs: Arc<dyn CertificateProvider>,
}

/// Per-connection limits.
#[derive(Debug, Clone)]
pub struct DispatchLimits {
    pub max_body_size: usize,
    pub max_header_size: usize,
    /// Wait for the next request head; `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

impl DispatchLimits {
    pub fn from_config(limits: &LimitsConfig, idle_secs: u64) -> Self {
        Self {
            max_body_size: limits.max_body_size,
            max_header_size: limits.max_header_size,
            idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
        }
    }
}

impl Default for DispatchLimits {
    fn default() -> Self {
        Self::from_config(&LimitsConfig::default(), 0)
    }
}

/// Methods the agent path forwards.
fn agent_supports(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::POST | Method::HEAD | Method::PUT | Method::DELETE | Method::PATCH
    )
}

enum State {
    AwaitingRequestLine(ClientConnection),
    Tunnel(ClientConnection, RequestHead),
    Transaction(ClientConnection, RequestHead),
    Done,
}

/// Drives one client connection from accept to close.
pub struct Dispatcher {
    rules: Arc<RoutingRuleSet>,
    classifier: Arc<LocalAddressClassifier>,
    collaborators: Collaborators,
    limits: DispatchLimits,
}

impl Dispatcher {
    /// `rules` is the snapshot this connection keeps for its lifetime.
    pub fn new(
        rules: Arc<RoutingRuleSet>,
        classifier: Arc<LocalAddressClassifier>,
        collaborators: Collaborators,
        limits: DispatchLimits,
    ) -> Self {
        Self {
            rules,
            classifier,
            collaborators,
            limits,
        }
    }

    /// Serve `conn` until the client disconnects or a transaction closes it.
    pub async fn serve(&self, conn: ClientConnection) -> Result<()> {
        let mut state = State::AwaitingRequestLine(conn);
        loop {
            state = match state {
                State::AwaitingRequestLine(mut conn) => match self.read_head(&mut conn).await? {
                    None => State::Done,
                    Some(head) if head.method == Method::CONNECT => State::Tunnel(conn, head),
                    Some(head) => State::Transaction(conn, head),
                },
                State::Tunnel(conn, head) => {
                    let certs = self.collaborators.certs.as_ref();
                    match establish_tunnel(conn, &head.target, certs).await? {
                        TunnelOutcome::Intercepted(conn) | TunnelOutcome::Plaintext(conn) => {
                            State::AwaitingRequestLine(conn)
                        }
                        TunnelOutcome::Closed => State::Done,
                    }
                }
                State::Transaction(mut conn, head) => {
                    if self.transaction(&mut conn, head).await? {
                        State::AwaitingRequestLine(conn)
                    } else {
                        State::Done
                    }
                }
                State::Done => return Ok(()),
            };
        }
    }

    async fn read_head(&self, conn: &mut ClientConnection) -> Result<Option<RequestHead>> {
        let max = self.limits.max_header_size;
        let read = RequestHead::read(conn.reader(), max);
        match self.limits.idle_timeout {
            Some(idle) => match tokio::time::timeout(idle, read).await {
                Ok(head) => head,
                Err(_) => {
                    debug!("Idle timeout waiting for request");
                    Ok(None)
                }
            },
            None => read.await,
        }
    }

    /// Run one request/response exchange. Returns whether the connection
    /// stays open for another request.
    async fn transaction(&self, conn: &mut ClientConnection, head: RequestHead) -> Result<bool> {
        let mut ctx = match RequestContext::from_head(head, conn.scheme()) {
            Ok(ctx) => ctx,
            Err(e) => {
                conn.write_all(BAD_REQUEST).await?;
                conn.flush().await?;
                return Err(e);
            }
        };

        let route = decide(
            &self.rules,
            &self.classifier,
            &ctx.local_candidates(),
            &ctx.host_name,
            ctx.url.len(),
        );
        metrics::record_route(route);
        debug!(method = %ctx.method, url = %ctx.url, route = %route, "Routing request");

        let result = match route {
            Route::Local => self.local_forward(conn, &mut ctx).await,
            Route::SelfCheck => self.self_check(conn, &mut ctx).await,
            Route::Direct => self.direct_forward(conn, &mut ctx).await,
            Route::Agent => self.agent_forward(conn, &mut ctx).await,
        };
        if let Err(e) = result {
            if matches!(e, ProxyError::BodyTooLarge { .. }) {
                let _ = conn.write_all(PAYLOAD_TOO_LARGE).await;
                let _ = conn.flush().await;
            }
            return Err(e);
        }

        conn.flush().await?;
        Ok(ctx.keep_alive())
    }

    async fn local_forward(&self, conn: &mut ClientConnection, ctx: &mut RequestContext) -> Result<()> {
        let payload = ctx.read_payload(conn.reader(), self.limits.max_body_size).await?;
        let response = self
            .collaborators
            .loopback
            .request(&ctx.method, &ctx.raw_target, &ctx.headers, payload)
            .await;

        match response {
            Ok(response) => {
                let bytes = response::local_response(response.status, &response.headers, &response.body);
                conn.write_all(&bytes).await?;
            }
            Err(e) => {
                metrics::record_forward_failure("local");
                warn!(url = %ctx.url, error = %e, "Loopback request failed");
                ctx.close_after_response = true;
            }
        }
        Ok(())
    }

    async fn self_check(&self, conn: &mut ClientConnection, ctx: &mut RequestContext) -> Result<()> {
        conn.write_all(SELF_CHECK_RESPONSE).await?;
        if ctx.has_unread_payload() {
            // the unread body would be parsed as the next request
            ctx.close_after_response = true;
        }
        Ok(())
    }

    async fn direct_forward(&self, conn: &mut ClientConnection, ctx: &mut RequestContext) -> Result<()> {
        let request = self.forward_request(conn, ctx).await?;
        let fallback = DirectFallback::new(self.collaborators.direct.as_ref());
        if fallback.forward(&request, conn.sink()).await.closes_connection() {
            ctx.close_after_response = true;
        }
        Ok(())
    }

    async fn agent_forward(&self, conn: &mut ClientConnection, ctx: &mut RequestContext) -> Result<()> {
        let request = self.forward_request(conn, ctx).await?;

        if request.method == Method::OPTIONS {
            debug!(url = %ctx.url, "Answering CORS preflight");
            conn.write_all(&response::preflight(&ctx.headers)).await?;
            return Ok(());
        }

        if !agent_supports(&request.method) {
            let err = ProxyError::UnsupportedMethod(request.method.to_string());
            info!(url = %ctx.url, error = %err, "Refusing request");
            conn.write_all(NOT_FOUND).await?;
            return Ok(());
        }

        let fallback = DirectFallback::new(self.collaborators.direct.as_ref());
        let outcome = self
            .collaborators
            .agent
            .handle(&request, conn.sink(), &fallback)
            .await;
        if outcome.closes_connection() {
            ctx.close_after_response = true;
        }
        Ok(())
    }

    async fn forward_request(
        &self,
        conn: &mut ClientConnection,
        ctx: &mut RequestContext,
    ) -> Result<ForwardRequest> {
        let payload = ctx.read_payload(conn.reader(), self.limits.max_body_size).await?;
        Ok(ForwardRequest {
            method: ctx.method.clone(),
            host: ctx.host.clone(),
            url: ctx.url.clone(),
            path: ctx.path.clone(),
            headers: ctx.headers.clone(),
            payload,
        })
    }
}

/// Log a connection's terminal error at a level matching its cause.
pub fn log_connection_error(err: &ProxyError) {
    match err {
        e if e.is_disconnect() => debug!(error = %e, "Client disconnected"),
        ProxyError::UnsupportedTunnelPort(port) => {
            debug!(port, "Dropped CONNECT to unsupported port")
        }
        ProxyError::TlsHandshake { .. } => debug!(error = %err, "Connection closed after TLS failure"),
        ProxyError::BadRequest(_) | ProxyError::BodyTooLarge { .. } => {
            info!(error = %err, "Rejected request")
        }
        _ => warn!(error = %err, "Connection failed"),
    }
}
