//! Certificate collaborator interface.
//!
//! The interception engine never builds certificates itself. It asks a
//! [`CertificateProvider`] for a ready TLS server context for the host the
//! client is tunnelling to and treats the result as opaque.

pub mod store;

use std::sync::Arc;

use rustls::ServerConfig;
use thiserror::Error;

pub use store::PemCertStore;

/// Opaque TLS server context for one intercepted host.
pub type CertificateHandle = Arc<ServerConfig>;

/// Errors from a certificate provider.
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("no certificate available for {0}")]
    NotFound(String),
    #[error("failed to read certificate file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("certificate file {0} holds no private key")]
    MissingKey(String),
    #[error("invalid certificate for {host}: {source}")]
    Invalid {
        host: String,
        #[source]
        source: rustls::Error,
    },
}

/// Produces server-side TLS contexts for intercepted hosts.
///
/// Implementations own caching and must be safe to call concurrently for
/// the same host without serialising unrelated hosts.
pub trait CertificateProvider: Send + Sync {
    /// Get or create the certificate for `host`.
    ///
    /// `full_domain` asks for a certificate naming `host` exactly rather than
    /// the provider's usual (possibly wildcard) choice. Providers should keep
    /// serving the full-domain certificate for that host afterwards.
    fn get_certificate(
        &self,
        host: &str,
        full_domain: bool,
    ) -> Result<CertificateHandle, CertificateError>;
}
