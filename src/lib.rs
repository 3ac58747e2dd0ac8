//! Client-side entry point of a censorship-circumvention HTTP/HTTPS proxy.
//!
//! Browsers point at this proxy. Every request is classified by destination
//! host and then answered locally, forwarded straight to the destination,
//! or handed to the upstream tunnel backend. CONNECT tunnels are terminated
//! with a per-host certificate so HTTPS requests route exactly like plain
//! HTTP.

pub mod certs;
pub mod config;
pub mod error;
pub mod forward;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;

pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use http::ProxyServer;
pub use lifecycle::Shutdown;
