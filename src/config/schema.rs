//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the local proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// Host rule sets consulted by the routing engine.
    pub routing: RoutingConfig,

    /// Where intercepted-TLS certificates come from.
    pub certs: CertConfig,

    /// Forwarding backends.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request size limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8087").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8087".to_string(),
            max_connections: 1024,
        }
    }
}

/// Routing rule sets.
///
/// Exact host lists always win over suffix lists. Suffixes are matched as
/// plain string suffixes, so `.google.com` does not match `google.com`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Hosts always sent through the agent.
    pub agent_hosts: Vec<String>,

    /// Hosts always sent direct.
    pub direct_hosts: Vec<String>,

    /// Suffixes sent through the agent.
    pub agent_suffixes: Vec<String>,

    /// Suffixes sent direct.
    pub direct_suffixes: Vec<String>,

    /// Suffixes whose over-long URLs go direct.
    pub google_suffixes: Vec<String>,

    /// Host answered with the literal self-check response.
    pub self_check_host: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        let google = [
            ".google.com",
            ".googleapis.com",
            ".gstatic.com",
            ".googleusercontent.com",
            ".ggpht.com",
        ];
        Self {
            agent_hosts: Vec::new(),
            direct_hosts: Vec::new(),
            agent_suffixes: vec![".youtube.com".to_string(), ".googlevideo.com".to_string()],
            direct_suffixes: google.iter().map(|s| s.to_string()).collect(),
            google_suffixes: google.iter().map(|s| s.to_string()).collect(),
            self_check_host: "proxy-check.local".to_string(),
        }
    }
}

/// Certificate store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CertConfig {
    /// Directory holding `<host>.pem`, `_.<parent>.pem` and `default.pem`.
    pub dir: String,
}

impl Default for CertConfig {
    fn default() -> Self {
        Self {
            dir: "certs".to_string(),
        }
    }
}

/// Forwarding backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Upstream HTTP proxy carrying agent traffic ("host:port").
    /// When unset, agent requests fall back to direct forwarding.
    pub agent_proxy: Option<String>,

    /// Port used by the direct forwarder when the URL carries none.
    pub direct_port: u16,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            agent_proxy: None,
            direct_port: 443,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout for forwarders, in seconds.
    pub connect_secs: u64,

    /// How long to wait for the next request head on a connection.
    /// Zero waits forever.
    pub idle_secs: u64,

    /// How long graceful shutdown waits for active connections.
    pub shutdown_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            idle_secs: 120,
            shutdown_secs: 5,
        }
    }
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum request body size in bytes.
    pub max_body_size: usize,

    /// Maximum size of the request line plus headers.
    pub max_header_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_size: 64 * 1024 * 1024,
            max_header_size: 64 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "0.0.0.0:9000"

            [routing]
            agent_hosts = ["www.example.org"]
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "0.0.0.0:9000");
        assert_eq!(config.listener.max_connections, 1024);
        assert_eq!(config.routing.agent_hosts, vec!["www.example.org"]);
        assert_eq!(config.routing.self_check_host, "proxy-check.local");
        assert_eq!(config.upstream.direct_port, 443);
    }
}
