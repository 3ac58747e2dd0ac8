//! Host matching primitives.
//!
//! # Responsibilities
//! - Exact host membership (case-insensitive)
//! - Ordered suffix lists (plain string suffix, case-insensitive)
//!
//! # Design Decisions
//! - Entries are lower-cased once at construction; callers pass lower-cased hosts
//! - Suffix matching has no dot-boundary rule: `.google.com` is written with
//!   its leading dot when the apex must not match

use std::collections::HashSet;

/// Matches a host name against a compiled rule.
pub trait HostMatcher: Send + Sync + std::fmt::Debug {
    /// Returns true if `host` (already lower-cased) matches.
    fn matches(&self, host: &str) -> bool;
}

/// Exact host membership.
#[derive(Debug, Clone, Default)]
pub struct ExactHosts {
    hosts: HashSet<String>,
}

impl ExactHosts {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.as_ref().trim().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl HostMatcher for ExactHosts {
    fn matches(&self, host: &str) -> bool {
        self.hosts.contains(host)
    }
}

/// Ordered list of suffixes, first match wins.
#[derive(Debug, Clone, Default)]
pub struct SuffixList {
    suffixes: Vec<String>,
}

impl SuffixList {
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            suffixes: suffixes
                .into_iter()
                .map(|s| s.as_ref().trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// The first suffix that matches, if any.
    pub fn find(&self, host: &str) -> Option<&str> {
        self.suffixes
            .iter()
            .find(|s| host.ends_with(s.as_str()))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.suffixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }
}

impl HostMatcher for SuffixList {
    fn matches(&self, host: &str) -> bool {
        self.find(host).is_some()
    }
}
