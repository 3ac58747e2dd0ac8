//! Compiled routing rule snapshot.

use crate::config::RoutingConfig;
use crate::routing::matcher::{ExactHosts, HostMatcher, SuffixList};

/// Immutable rule set shared by every connection.
///
/// A connection loads one snapshot when it starts and keeps it until it
/// closes, so a reload never changes the rules under an in-flight request.
#[derive(Debug, Clone, Default)]
pub struct RoutingRuleSet {
    pub agent_exact_hosts: ExactHosts,
    pub direct_exact_hosts: ExactHosts,
    pub agent_suffixes: SuffixList,
    pub direct_suffixes: SuffixList,
    pub google_suffixes: SuffixList,
    self_check_host: String,
}

impl RoutingRuleSet {
    pub fn from_config(config: &RoutingConfig) -> Self {
        Self {
            agent_exact_hosts: ExactHosts::new(&config.agent_hosts),
            direct_exact_hosts: ExactHosts::new(&config.direct_hosts),
            agent_suffixes: SuffixList::new(&config.agent_suffixes),
            direct_suffixes: SuffixList::new(&config.direct_suffixes),
            google_suffixes: SuffixList::new(&config.google_suffixes),
            self_check_host: config.self_check_host.trim().to_ascii_lowercase(),
        }
    }

    /// The host whose requests get the literal self-check response.
    pub fn self_check_host(&self) -> &str {
        &self.self_check_host
    }

    pub fn is_self_check(&self, host: &str) -> bool {
        !self.self_check_host.is_empty() && self.self_check_host == host
    }

    pub fn is_agent_exact(&self, host: &str) -> bool {
        self.agent_exact_hosts.matches(host)
    }

    pub fn is_direct_exact(&self, host: &str) -> bool {
        self.direct_exact_hosts.matches(host)
    }
}
