//! Infrastructure layer: Postgres, Redis, configuration.
//!
//! Every storage concern is a trait with a Postgres or Redis implementation
//! for deployments and an in-memory one for tests and local development.

pub mod cache;
pub mod config;
pub mod credential_store;
pub mod db;
pub mod membership;
pub mod permission_resolver;
pub mod rate_limit;

pub use cache::{Cache, CacheError, DisabledCache, InMemoryCache, RedisCache};
pub use config::{ConfigError, EnvSource, Environment, RedisConfig};
pub use credential_store::{
    CredentialStore, InMemoryCredentialStore, NewRole, NewUser, PostgresCredentialStore, RoleChange,
    RoleRecord, RoleUpdate, StoreError, UserRecord, UserUpdate,
};
pub use db::{Database, DatabaseError};
pub use membership::{InMemoryMembershipStore, PostgresMembershipStore, TenantMembershipStore};
pub use permission_resolver::{PROFILE_CACHE_TTL, PermissionResolver};
pub use rate_limit::{RateDecision, RateLimitRule, RateLimiter};
