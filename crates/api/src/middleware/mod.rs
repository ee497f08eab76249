//! The per-request authorization chain.
//!
//! Stages run in a fixed order and any stage short-circuits with an
//! [`ApiError`](crate::ApiError):
//!
//! 1. [`authenticate`] (or [`optional_auth`])
//! 2. [`bind_tenant`] on tenant-scoped routes
//! 3. [`require_permissions`] / [`require_role`]
//!
//! With axum, layers added later run first, so routers add them in reverse.

mod auth;
mod authorize;
mod request;
mod tenant;

pub use auth::{AuthState, authenticate, extract_token, optional_auth};
pub use authorize::{PermissionRequirement, RoleRequirement, require_permissions, require_role};
pub use request::{X_REQUEST_ID, expose_internal_errors, log_requests, request_id};
pub use tenant::{TENANT_HEADER, TenantBinding, bind_tenant};
