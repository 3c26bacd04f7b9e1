//! Fleet capacity controller library.
//!
//! Keeps a fleet of interchangeable worker instances at an operator-chosen
//! size, routes traffic only to healthy members, and records every desired
//! capacity change as an immutable version.

// Control plane
pub mod controller;
pub mod lock;
pub mod provision;
pub mod state;

// Data plane
pub mod fleet;
pub mod health;
pub mod http;
pub mod load_balancer;
pub mod registry;
pub mod routing;

// Cross-cutting concerns
pub mod admin;
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::FleetConfig;
pub use controller::CapacityController;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
