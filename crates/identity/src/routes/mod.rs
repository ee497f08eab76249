use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::MethodRouter;

use nexus_api::middleware::{PermissionRequirement, RoleRequirement, require_permissions, require_role};
use nexus_api::ApiError;
use nexus_auth::{Permission, Role};
use nexus_core::{RoleId, UserId};

pub mod auth;
pub mod roles;
pub mod system;
pub mod users;

pub const READ_USERS: &str = "identity:read:users";
pub const CREATE_USERS: &str = "identity:create:users";
pub const UPDATE_USERS: &str = "identity:update:users";
pub const DELETE_USERS: &str = "identity:delete:users";
pub const MANAGE_ROLES: &str = "identity:manage:roles";

/// Guard one method route with a permission set.
pub(crate) fn with_permissions(route: MethodRouter, permissions: &[&'static str]) -> MethodRouter {
    let requirement = PermissionRequirement::all(permissions.iter().copied().map(Permission::new));
    route.route_layer(from_fn_with_state(Arc::new(requirement), require_permissions))
}

/// Guard one method route with a role.
pub(crate) fn with_role(route: MethodRouter, role: Role) -> MethodRouter {
    route.route_layer(from_fn_with_state(Arc::new(RoleRequirement(role)), require_role))
}

pub(crate) fn parse_user_id(raw: &str) -> Result<UserId, ApiError> {
    raw.parse().map_err(|_| ApiError::not_found("User not found"))
}

pub(crate) fn parse_role_id(raw: &str) -> Result<RoleId, ApiError> {
    raw.parse().map_err(|_| ApiError::not_found("Role not found"))
}
