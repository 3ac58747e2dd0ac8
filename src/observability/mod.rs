//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Connection tasks produce:
//!     → logging.rs (structured tracing events, one span per connection)
//!     → metrics.rs (counters and gauges)
//!
//! Consumers:
//!     → stdout via the fmt layer
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;
