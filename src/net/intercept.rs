//! TLS interception of CONNECT tunnels.
//!
//! # Data Flow
//! ```text
//! CONNECT host:port
//!     → port check (80/443 only, otherwise dropped silently)
//!     → certificate lookup for host
//!     → "200 Connection Established"
//!     → peek first tunnel byte
//!         0x16 / 0x80  → server TLS handshake → promoted connection
//!         'A'..='Z'    → plaintext HTTP on the same connection
//!         other / EOF  → close
//! ```
//!
//! A client that rejects the presented certificate makes the provider
//! switch that host to a full-domain certificate, so the browser's retry
//! gets one that matches exactly.

use rustls::AlertDescription;
use tracing::{debug, info, warn};

use crate::certs::{CertificateHandle, CertificateProvider};
use crate::error::{ProxyError, Result};
use crate::http::response::CONNECTION_ESTABLISHED;
use crate::net::connection::ClientConnection;
use crate::observability::metrics;

/// Ports a CONNECT may target.
pub const TUNNEL_PORTS: [u16; 2] = [80, 443];

/// Certificate host used when a TLS connection arrives without any hint.
pub const DEFAULT_TLS_HOST: &str = "www.google.com";

const TLS_RECORD_HANDSHAKE: u8 = 0x16;
const SSLV2_CLIENT_HELLO: u8 = 0x80;

/// What a tunnel turned into after the 200 was sent.
#[derive(Debug)]
pub enum TunnelOutcome {
    /// TLS was terminated; the connection now reads plaintext HTTP.
    Intercepted(ClientConnection),
    /// The client speaks plain HTTP inside the tunnel.
    Plaintext(ClientConnection),
    /// Neither TLS nor HTTP, or the client went away. Close it.
    Closed,
}

/// Split a CONNECT target at its last colon.
pub fn parse_tunnel_target(target: &str) -> Result<(String, u16)> {
    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| ProxyError::bad_request(format!("CONNECT target {target:?} has no port")))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| ProxyError::bad_request(format!("CONNECT target {target:?} has a bad port")))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(ProxyError::bad_request(format!("CONNECT target {target:?} has no host")));
    }
    if host.contains(['/', '\\']) || host.contains("..") {
        return Err(ProxyError::bad_request(format!("CONNECT target {target:?} is not a host name")));
    }
    Ok((host.to_ascii_lowercase(), port))
}

/// Answer a CONNECT and look at what the client sends through the tunnel.
///
/// Nothing is written to the client when the port is refused or the
/// certificate cannot be produced.
pub async fn establish_tunnel(
    mut conn: ClientConnection,
    target: &str,
    certs: &dyn CertificateProvider,
) -> Result<TunnelOutcome> {
    let (host, port) = parse_tunnel_target(target)?;
    if !TUNNEL_PORTS.contains(&port) {
        return Err(ProxyError::UnsupportedTunnelPort(port));
    }

    let context = certs.get_certificate(&host, false)?;

    conn.write_all(CONNECTION_ESTABLISHED).await?;
    conn.flush().await?;

    match conn.peek_byte().await? {
        Some(TLS_RECORD_HANDSHAKE | SSLV2_CLIENT_HELLO) => {
            handshake(conn, &host, context, certs).await.map(TunnelOutcome::Intercepted)
        }
        Some(b) if b.is_ascii_uppercase() => {
            debug!(host = %host, "Plaintext HTTP inside tunnel");
            Ok(TunnelOutcome::Plaintext(conn))
        }
        Some(b) => {
            debug!(host = %host, first_byte = b, "Unrecognised tunnel protocol, closing");
            Ok(TunnelOutcome::Closed)
        }
        None => Ok(TunnelOutcome::Closed),
    }
}

/// Terminate TLS on a connection that is known to carry it.
///
/// Used when TLS arrives without a CONNECT preamble; `host` falls back to
/// [`DEFAULT_TLS_HOST`].
pub async fn wrap_tls(
    conn: ClientConnection,
    host: Option<&str>,
    certs: &dyn CertificateProvider,
) -> Result<ClientConnection> {
    let host = host.unwrap_or(DEFAULT_TLS_HOST).to_ascii_lowercase();
    let context = certs.get_certificate(&host, false)?;
    handshake(conn, &host, context, certs).await
}

async fn handshake(
    conn: ClientConnection,
    host: &str,
    context: CertificateHandle,
    certs: &dyn CertificateProvider,
) -> Result<ClientConnection> {
    match conn.promote_to_tls(context).await {
        Ok(promoted) => {
            debug!(host = %host, "Client TLS handshake complete");
            Ok(promoted)
        }
        Err(e) => {
            let certificate_rejected = rejected_certificate(&e);
            if certificate_rejected {
                metrics::record_tls_failure("certificate_rejected");
                info!(host = %host, error = %e, "Client rejected certificate, switching to full-domain");
                if let Err(cert_err) = certs.get_certificate(host, true) {
                    warn!(host = %host, error = %cert_err, "Full-domain certificate unavailable");
                }
            } else {
                metrics::record_tls_failure("handshake_error");
                if is_reset(&e) {
                    debug!(host = %host, error = %e, "Client dropped during TLS handshake");
                } else {
                    warn!(host = %host, error = %e, "Client TLS handshake failed");
                }
            }
            Err(ProxyError::TlsHandshake {
                host: host.to_string(),
                reason: e.to_string(),
                certificate_rejected,
            })
        }
    }
}

/// Whether a handshake failed because the client refused our certificate.
fn rejected_certificate(err: &std::io::Error) -> bool {
    let Some(tls_err) = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
    else {
        return false;
    };
    matches!(
        tls_err,
        rustls::Error::AlertReceived(
            AlertDescription::BadCertificate
                | AlertDescription::CertificateUnknown
                | AlertDescription::UnknownCA
                | AlertDescription::UnsupportedCertificate
        ) | rustls::Error::InvalidCertificate(_)
    )
}

fn is_reset(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::BrokenPipe
    )
}
