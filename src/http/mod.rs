//! HTTP data plane.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → middleware/ingress.rs (listener permission set)
//!     → request.rs (request ID, host/path extraction)
//!     → server.rs proxy handler
//!     → routing::TrafficRouter (rule match, healthy member pick)
//!     → forward to member, or fixed response
//! ```

pub mod middleware;
pub mod request;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
