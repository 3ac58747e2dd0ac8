//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Client connection (plain or intercepted TLS)
//!     → server.rs (accept loop, one task per connection)
//!     → dispatcher.rs (per-connection state machine)
//!         → request.rs (head parsing, request context)
//!         → framing.rs (Content-Length / chunked bodies)
//!         → [routing engine picks LOCAL / SELF_CHECK / DIRECT / AGENT]
//!         → forwarding collaborator, or response.rs for local answers
//!     → Response written back to the client
//! ```

pub mod dispatcher;
pub mod framing;
pub mod request;
pub mod response;
pub mod server;

pub use dispatcher::{Collaborators, DispatchLimits, Dispatcher};
pub use request::{Headers, RequestContext, RequestHead};
pub use server::ProxyServer;
