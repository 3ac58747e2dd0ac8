//! Local-address classification.
//!
//! Decides whether a requested host is this machine. The set of local
//! names is resolved lazily on first use and then frozen for the process.

use std::collections::HashSet;
use std::net::ToSocketAddrs;
use std::sync::OnceLock;

/// Prefixes of address ranges that are always treated as local.
const LOCAL_PREFIXES: [&str; 4] = ["127.", "192.168.", "10.", "169.254."];

/// Names and addresses that refer to this machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalNames {
    names: HashSet<String>,
}

impl LocalNames {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| n.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    /// `localhost`, the machine hostname, and whatever that hostname resolves to.
    ///
    /// A failed lookup leaves the address part out; it is not retried.
    pub fn from_system() -> Self {
        let mut names = HashSet::from(["localhost".to_string()]);

        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .map(|h| h.to_ascii_lowercase());

        if let Some(host) = host {
            match (host.as_str(), 0u16).to_socket_addrs() {
                Ok(addrs) => names.extend(addrs.map(|a| a.ip().to_string())),
                Err(e) => tracing::debug!(host = %host, error = %e, "Local hostname did not resolve"),
            }
            names.insert(host);
        }

        tracing::debug!(count = names.len(), "Local names resolved");
        Self { names }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

type Resolver = Box<dyn Fn() -> LocalNames + Send + Sync>;

/// Classifies hosts as local, resolving local names at most once.
pub struct LocalAddressClassifier {
    names: OnceLock<LocalNames>,
    resolve: Resolver,
}

impl LocalAddressClassifier {
    /// Classifier backed by the system hostname.
    pub fn new() -> Self {
        Self::with_resolver(LocalNames::from_system)
    }

    /// Classifier with a custom (lazily invoked) resolver.
    pub fn with_resolver(resolve: impl Fn() -> LocalNames + Send + Sync + 'static) -> Self {
        Self {
            names: OnceLock::new(),
            resolve: Box::new(resolve),
        }
    }

    /// Classifier with a fixed, already-resolved name set.
    pub fn with_names(names: LocalNames) -> Self {
        let classifier = Self::with_resolver(LocalNames::default);
        let _ = classifier.names.set(names);
        classifier
    }

    /// True if any candidate refers to this machine.
    pub fn is_local<S: AsRef<str>>(&self, candidates: &[S]) -> bool {
        candidates.iter().any(|c| {
            let host = c.as_ref().to_ascii_lowercase();
            if host.is_empty() {
                return false;
            }
            LOCAL_PREFIXES.iter().any(|p| host.starts_with(p)) || self.names().contains(&host)
        })
    }

    fn names(&self) -> &LocalNames {
        self.names.get_or_init(|| (self.resolve)())
    }
}

impl Default for LocalAddressClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalAddressClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAddressClassifier")
            .field("names", &self.names.get())
            .finish()
    }
}
