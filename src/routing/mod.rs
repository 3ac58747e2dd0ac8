//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Parsed request (candidate hosts, host name, URL length)
//!     → local.rs (is the destination this machine?)
//!     → router.rs (ordered precedence checks)
//!     → matcher.rs (exact host sets, suffix lists)
//!     → Return: Route
//!
//! Rule compilation (at startup and on reload):
//!     RoutingConfig
//!     → lower-case and compile matchers
//!     → freeze as immutable RoutingRuleSet
//!     → published through ArcSwap
//! ```
//!
//! # Design Decisions
//! - Rules compiled once, immutable at runtime
//! - No regex in hot path (hash lookups and suffix scans only)
//! - Deterministic: same input always yields the same route
//! - Exact host rules always beat suffix rules

pub mod local;
pub mod matcher;
pub mod router;
pub mod rules;

pub use local::{LocalAddressClassifier, LocalNames};
pub use router::{decide, Route, MAX_AGENT_URL_LEN};
pub use rules::RoutingRuleSet;
