//! Credential store: users, roles, permissions and their assignments.
//!
//! The store is the single source of truth for who holds what. Multi-row
//! mutations (role + permission grants, user + initial role, cascading
//! deletes) are atomic in every implementation.

mod in_memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use nexus_auth::PermissionRecord;
use nexus_core::{PermissionId, RoleId, TenantId, UserId};

pub use in_memory::InMemoryCredentialStore;
pub use postgres::PostgresCredentialStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Uniqueness violation (duplicate role name, email, assignment).
    #[error("{0}")]
    Conflict(String),

    #[error("role is assigned to {holders} user(s)")]
    RoleInUse { holders: u64 },

    /// A referenced row (permission, role, user) does not exist.
    #[error("{0}")]
    InvalidReference(String),

    #[error("storage error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub tenant_id: TenantId,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRecord {
    pub id: RoleId,
    pub tenant_id: TenantId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub tenant_id: TenantId,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct NewRole {
    pub tenant_id: TenantId,
    pub name: String,
    pub description: Option<String>,
    pub permission_ids: Vec<PermissionId>,
}

#[derive(Debug, Clone, Default)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    /// `Some` replaces the role's whole permission set.
    pub permission_ids: Option<Vec<PermissionId>>,
}

/// Result of a role mutation: the updated role plus every user holding it,
/// whose cached profiles are now stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleChange {
    pub role: RoleRecord,
    pub holders: Vec<UserId>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user(&self, user_id: UserId) -> StoreResult<Option<UserRecord>>;

    /// Emails are stored lowercased; callers normalize before lookup.
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>>;

    async fn list_users(&self, tenant_id: Option<TenantId>) -> StoreResult<Vec<UserRecord>>;

    /// Insert a user and, optionally, its first role assignment atomically.
    async fn create_user(&self, user: NewUser, initial_role: Option<RoleId>) -> StoreResult<UserRecord>;

    async fn update_user(&self, user_id: UserId, update: UserUpdate) -> StoreResult<UserRecord>;

    /// Remove a user and all of its role assignments atomically.
    async fn delete_user(&self, user_id: UserId) -> StoreResult<()>;

    async fn record_login(&self, user_id: UserId) -> StoreResult<()>;

    async fn roles_for_user(&self, user_id: UserId) -> StoreResult<Vec<RoleRecord>>;

    /// Every permission reachable through the user's roles, one row per
    /// `(role, permission)` pair. Duplicates are expected.
    async fn permissions_for_user(&self, user_id: UserId) -> StoreResult<Vec<PermissionRecord>>;

    /// Fails with `Conflict` if the user already holds the role.
    async fn assign_role(&self, user_id: UserId, role_id: RoleId) -> StoreResult<()>;

    async fn remove_role(&self, user_id: UserId, role_id: RoleId) -> StoreResult<()>;

    async fn list_roles(&self, tenant_id: TenantId) -> StoreResult<Vec<RoleRecord>>;

    async fn find_role(&self, tenant_id: TenantId, role_id: RoleId) -> StoreResult<Option<RoleRecord>>;

    async fn find_role_by_name(&self, tenant_id: TenantId, name: &str) -> StoreResult<Option<RoleRecord>>;

    async fn role_permissions(&self, role_id: RoleId) -> StoreResult<Vec<PermissionRecord>>;

    /// Insert a role and its permission grants atomically.
    async fn create_role(&self, role: NewRole) -> StoreResult<RoleRecord>;

    async fn update_role(
        &self,
        tenant_id: TenantId,
        role_id: RoleId,
        update: RoleUpdate,
    ) -> StoreResult<RoleChange>;

    /// Fails with `RoleInUse` while any user holds the role.
    async fn delete_role(&self, tenant_id: TenantId, role_id: RoleId) -> StoreResult<()>;

    async fn list_permissions(&self) -> StoreResult<Vec<PermissionRecord>>;

    async fn ping(&self) -> StoreResult<()>;
}
