//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (connection caps and size limits > 0, addresses parse)
//! - Reject empty rule entries, which would match every host as a suffix
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("{field} contains an empty entry")]
    EmptyRule { field: &'static str },
    #[error("routing.self_check_host must not be empty")]
    EmptySelfCheckHost,
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero {
            field: "listener.max_connections",
        });
    }
    if config.limits.max_header_size == 0 {
        errors.push(ValidationError::Zero {
            field: "limits.max_header_size",
        });
    }
    if config.limits.max_body_size == 0 {
        errors.push(ValidationError::Zero {
            field: "limits.max_body_size",
        });
    }
    if config.upstream.direct_port == 0 {
        errors.push(ValidationError::Zero {
            field: "upstream.direct_port",
        });
    }

    let routing = &config.routing;
    let lists: [(&'static str, &[String]); 5] = [
        ("routing.agent_hosts", &routing.agent_hosts),
        ("routing.direct_hosts", &routing.direct_hosts),
        ("routing.agent_suffixes", &routing.agent_suffixes),
        ("routing.direct_suffixes", &routing.direct_suffixes),
        ("routing.google_suffixes", &routing.google_suffixes),
    ];
    for (field, entries) in lists {
        if entries.iter().any(|e| e.trim().is_empty()) {
            errors.push(ValidationError::EmptyRule { field });
        }
    }
    if routing.self_check_host.trim().is_empty() {
        errors.push(ValidationError::EmptySelfCheckHost);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
