//! `nexus-gateway` - the single public entry point in front of the Nexus
//! backends.
//!
//! Authenticates callers, binds tenants, checks route permissions and
//! rate budgets, then forwards to the owning backend with the caller's
//! identity attached as headers.

pub mod app;
pub mod config;
pub mod handlers;
pub mod middleware;
pub mod proxy;
pub mod routes;
pub mod services;

pub use app::build_app;
pub use config::GatewayConfig;
pub use services::GatewayServices;
