//! Identity service: login, registration, token refresh, service tokens and
//! user/role administration on top of the credential store.
//!
//! - `config`: environment configuration
//! - `services`: dependency-injected handles (store, cache, resolver, tokens)
//! - `routes/`: HTTP handlers, one file per area
//! - `dto`: request/response shapes
//! - `seed`: development fixtures for the in-memory store

pub mod app;
pub mod config;
pub mod dto;
pub mod middleware;
pub mod routes;
pub mod seed;
pub mod services;

pub use app::build_app;
pub use config::IdentityConfig;
pub use services::IdentityServices;
