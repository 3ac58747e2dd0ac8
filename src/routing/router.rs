//! Route decision.
//!
//! # Responsibilities
//! - Map a parsed request onto one of the four routes
//! - Apply the precedence order exactly, first hit wins
//!
//! # Design Decisions
//! - Pure function over a rule snapshot and a classifier
//! - Over-long URLs on Google front domains bypass the agent, whose
//!   transport cannot carry them
//! - Exact-host rules are consulted before any suffix rule

use crate::routing::local::LocalAddressClassifier;
use crate::routing::matcher::HostMatcher;
use crate::routing::rules::RoutingRuleSet;

/// URLs longer than this never go through the agent on Google domains.
pub const MAX_AGENT_URL_LEN: usize = 2083;

/// Where a transaction is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// The destination is this machine.
    Local,
    /// Health check from the status page; answered with a literal response.
    SelfCheck,
    /// Straight to the destination's own front servers.
    Direct,
    /// Through the upstream tunnel backend.
    Agent,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Local => "local",
            Route::SelfCheck => "self_check",
            Route::Direct => "direct",
            Route::Agent => "agent",
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decide the route for one transaction.
///
/// `candidates` are the raw host forms checked for locality (Host header,
/// its address part, derived host). `host` is the lower-cased destination
/// host name without port; `url_len` the length of the absolute URL.
pub fn decide<S: AsRef<str>>(
    rules: &RoutingRuleSet,
    classifier: &LocalAddressClassifier,
    candidates: &[S],
    host: &str,
    url_len: usize,
) -> Route {
    if classifier.is_local(candidates) {
        return Route::Local;
    }
    if rules.is_self_check(host) {
        return Route::SelfCheck;
    }
    if url_len > MAX_AGENT_URL_LEN && rules.google_suffixes.matches(host) {
        return Route::Direct;
    }
    if rules.is_agent_exact(host) {
        return Route::Agent;
    }
    if rules.is_direct_exact(host) {
        return Route::Direct;
    }
    if rules.agent_suffixes.matches(host) {
        return Route::Agent;
    }
    if rules.direct_suffixes.matches(host) {
        return Route::Direct;
    }
    Route::Agent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoutingConfig;
    use crate::routing::local::LocalNames;

    fn rules() -> RoutingRuleSet {
        RoutingRuleSet::from_config(&RoutingConfig {
            agent_hosts: vec!["www.google.com".into(), "agent.example.com".into()],
            direct_hosts: vec!["direct.youtube.com".into(), "plain.example.org".into()],
            agent_suffixes: vec![".youtube.com".into(), ".example.com".into()],
            direct_suffixes: vec![".google.com".into(), ".example.org".into()],
            google_suffixes: vec![".google.com".into()],
            self_check_host: "proxy-check.local".into(),
        })
    }

    fn classifier() -> LocalAddressClassifier {
        LocalAddressClassifier::with_names(LocalNames::new(["localhost"]))
    }

    fn route(host: &str, url_len: usize) -> Route {
        decide(&rules(), &classifier(), &[host], host, url_len)
    }

    #[test]
    fn local_beats_everything() {
        assert_eq!(route("localhost", 10), Route::Local);
        assert_eq!(route("127.0.0.1", 5000), Route::Local);
    }

    #[test]
    fn self_check_host() {
        assert_eq!(route("proxy-check.local", 10), Route::SelfCheck);
    }

    #[test]
    fn agent_exact_beats_suffixes() {
        // also matches the .google.com direct suffix
        assert_eq!(route("www.google.com", 100), Route::Agent);
        assert_eq!(route("agent.example.com", 100), Route::Agent);
    }

    #[test]
    fn long_url_on_google_suffix_goes_direct_even_if_agent_exact() {
        assert_eq!(route("www.google.com", MAX_AGENT_URL_LEN + 1), Route::Direct);
        assert_eq!(route("www.google.com", MAX_AGENT_URL_LEN), Route::Agent);
    }

    #[test]
    fn long_url_without_google_suffix_keeps_agent_exact() {
        assert_eq!(route("agent.example.com", 10_000), Route::Agent);
    }

    #[test]
    fn direct_exact_beats_agent_suffix() {
        assert_eq!(route("direct.youtube.com", 10), Route::Direct);
    }

    #[test]
    fn agent_suffix_checked_before_direct_suffix() {
        assert_eq!(route("m.youtube.com", 10), Route::Agent);
        assert_eq!(route("mail.google.com", 10), Route::Direct);
        assert_eq!(route("www.example.org", 10), Route::Direct);
    }

    #[test]
    fn unknown_hosts_default_to_agent() {
        assert_eq!(route("news.ycombinator.com", 10), Route::Agent);
    }

    #[test]
    fn candidates_drive_locality_not_host() {
        let r = decide(&rules(), &classifier(), &["192.168.0.10:8080", "192.168.0.10"], "nas", 10);
        assert_eq!(r, Route::Local);
    }
}
