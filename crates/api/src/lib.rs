//! Shared HTTP layer for the Nexus services.
//!
//! - `context`: request-scoped identity and tenant context
//! - `errors`: the error taxonomy and its JSON rendering
//! - `extract`: extractors handlers use to read the context
//! - `middleware`: the authorization chain (authenticate, tenant binding,
//!   permission/role enforcement) plus request id and logging
//! - `cors`: allow-list CORS layer

pub mod context;
pub mod cors;
pub mod errors;
pub mod extract;
pub mod middleware;

pub use context::{RequestId, TenantContext};
pub use errors::{ApiError, ApiResult, created, ok, ok_message};
pub use extract::{CurrentPrincipal, CurrentTenant, JsonBody};
