//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (buffered, peekable client connection; tracking)
//!     → Hand off to the HTTP dispatcher
//!         ↳ CONNECT → intercept.rs (fake tunnel, TLS termination)
//!                   → back to the dispatcher on the promoted connection
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - TLS promotion consumes the plain connection and returns a new one

pub mod connection;
pub mod intercept;
pub mod listener;
pub mod tls;

pub use connection::{ClientConnection, ConnectionTracker};
pub use intercept::{establish_tunnel, wrap_tls, TunnelOutcome};
pub use listener::{Listener, ListenerError};
