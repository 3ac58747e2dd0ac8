//! PEM directory backed certificate store.
//!
//! # Layout
//! ```text
//! <dir>/www.example.com.pem   cert chain + key for one host
//! <dir>/_.example.com.pem     wildcard cert for *.example.com
//! <dir>/default.pem           used when nothing more specific exists
//! ```
//!
//! Lookups without `full_domain` prefer the wildcard for the parent domain.
//! A host that was escalated to `full_domain` keeps getting its exact
//! certificate. Built server contexts are cached per file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};

use crate::certs::{CertificateError, CertificateHandle, CertificateProvider};
use crate::net::tls::{load_pem_file, server_config};

/// Certificate provider reading pre-issued PEM files.
#[derive(Debug)]
pub struct PemCertStore {
    dir: PathBuf,
    cache: DashMap<PathBuf, CertificateHandle>,
    full_domain_hosts: DashSet<String>,
}

impl PemCertStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: DashMap::new(),
            full_domain_hosts: DashSet::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of cached server contexts.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    fn candidates(&self, host: &str, full_domain: bool) -> Vec<PathBuf> {
        let mut files = Vec::with_capacity(3);
        if !full_domain {
            if let Some((_, parent)) = host.split_once('.') {
                if parent.contains('.') {
                    files.push(self.dir.join(format!("_.{parent}.pem")));
                }
            }
        }
        files.push(self.dir.join(format!("{host}.pem")));
        files.push(self.dir.join("default.pem"));
        files
    }

    fn load(&self, host: &str, path: &Path) -> Result<CertificateHandle, CertificateError> {
        if let Some(handle) = self.cache.get(path) {
            return Ok(handle.clone());
        }

        let (certs, key) = load_pem_file(path)?;
        let config = server_config(certs, key).map_err(|source| CertificateError::Invalid {
            host: host.to_string(),
            source,
        })?;

        // A concurrent load of the same file may have won; keep whichever landed first.
        let handle = self
            .cache
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(config))
            .clone();

        tracing::debug!(host = %host, file = ?path, "Certificate loaded");
        Ok(handle)
    }
}

impl CertificateProvider for PemCertStore {
    fn get_certificate(
        &self,
        host: &str,
        full_domain: bool,
    ) -> Result<CertificateHandle, CertificateError> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        // host names become file names under `dir`
        if host.is_empty() || host.contains(['/', '\\']) || host.contains("..") {
            return Err(CertificateError::NotFound(host));
        }
        if full_domain {
            self.full_domain_hosts.insert(host.clone());
        }
        let full_domain = full_domain || self.full_domain_hosts.contains(&host);

        for path in self.candidates(&host, full_domain) {
            if path.is_file() {
                return self.load(&host, &path);
            }
        }
        Err(CertificateError::NotFound(host))
    }
}
