//! TLS context construction and PEM loading.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use crate::certs::CertificateError;

/// The crypto provider used for every TLS context the proxy builds.
///
/// Picked explicitly so the proxy never depends on a process-wide default.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Build a server context presenting `certs` with `key`.
pub fn server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<ServerConfig, rustls::Error> {
    let mut config = ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    // Intercepted connections are always plain HTTP/1.x underneath.
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

/// Client context trusting the bundled web PKI roots.
pub fn webpki_client_config() -> Result<ClientConfig, rustls::Error> {
    let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Ok(ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth())
}

/// Read a PEM file holding a certificate chain followed by its private key.
pub fn load_pem_file(
    path: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), CertificateError> {
    let read_err = |source| CertificateError::Read {
        path: path.display().to_string(),
        source,
    };

    let mut reader = BufReader::new(File::open(path).map_err(read_err)?);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_err)?;

    let mut reader = BufReader::new(File::open(path).map_err(read_err)?);
    let key = rustls_pemfile::private_key(&mut reader)
        .map_err(read_err)?
        .ok_or_else(|| CertificateError::MissingKey(path.display().to_string()))?;

    Ok((certs, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_read_error() {
        let err = load_pem_file(Path::new("/nonexistent/cert.pem")).unwrap_err();
        assert!(matches!(err, CertificateError::Read { .. }));
    }

    #[test]
    fn cert_without_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("only-cert.pem");
        let cert = rcgen::generate_simple_self_signed(vec!["a.example".to_string()]).unwrap();
        std::fs::write(&path, cert.cert.pem()).unwrap();

        let err = load_pem_file(&path).unwrap_err();
        assert!(matches!(err, CertificateError::MissingKey(_)));
    }

    #[test]
    fn builds_server_config_from_generated_cert() {
        let cert = rcgen::generate_simple_self_signed(vec!["a.example".to_string()]).unwrap();
        let key = PrivateKeyDer::Pkcs8(cert.key_pair.serialize_der().into());
        let config = server_config(vec![cert.cert.der().clone()], key).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn webpki_client_config_builds() {
        assert!(webpki_client_config().is_ok());
    }
}
