//! Startup orchestration.
//!
//! Builds the default collaborators from configuration:
//! - [`PemCertStore`] over `certs.dir`
//! - [`HyperLoopbackClient`] for the LOCAL route
//! - [`TlsDirectForwarder`] for the DIRECT route
//! - [`UpstreamProxyForwarder`] for the AGENT route

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::certs::PemCertStore;
use crate::config::ProxyConfig;
use crate::forward::{HyperLoopbackClient, TlsDirectForwarder, UpstreamProxyForwarder};
use crate::http::{Collaborators, ProxyServer};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("certificate directory {0} does not exist")]
    MissingCertDir(String),
    #[error("failed to build TLS client context: {0}")]
    Tls(#[from] rustls::Error),
}

/// Build the default collaborator set for `config`.
pub fn default_collaborators(config: &ProxyConfig) -> Result<Collaborators, StartupError> {
    let cert_dir = Path::new(&config.certs.dir);
    if !cert_dir.is_dir() {
        return Err(StartupError::MissingCertDir(config.certs.dir.clone()));
    }

    let connect_timeout = Duration::from_secs(config.timeouts.connect_secs);
    let direct = TlsDirectForwarder::new(config.upstream.direct_port, connect_timeout)?;
    let agent = UpstreamProxyForwarder::new(config.upstream.agent_proxy.clone(), connect_timeout);

    tracing::info!(
        cert_dir = %cert_dir.display(),
        agent_proxy = agent.upstream().unwrap_or("none (direct fallback)"),
        "Collaborators ready"
    );

    Ok(Collaborators {
        loopback: Arc::new(HyperLoopbackClient::new(connect_timeout)),
        direct: Arc::new(direct),
        agent: Arc::new(agent),
        certs: Arc::new(PemCertStore::new(cert_dir)),
    })
}

/// Build a server wired with the default collaborators.
pub fn build_server(config: ProxyConfig) -> Result<ProxyServer, StartupError> {
    let collaborators = default_collaborators(&config)?;
    Ok(ProxyServer::new(config, collaborators))
}
