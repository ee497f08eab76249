//! `nexus-core` - identifiers and error primitives shared by every Nexus crate.
//!
//! Nothing in here talks to a database, a cache or the network.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{PermissionId, RoleId, TenantId, UserId};
