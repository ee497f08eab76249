//! `/users`: user administration and role assignment.
//!
//! Non-admin callers only ever see users of their own tenant (or themselves);
//! anything else is reported as not found.

use std::sync::Arc;

use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing::info;

use nexus_api::{ApiError, ApiResult, CurrentPrincipal, JsonBody, created, ok, ok_message};
use nexus_auth::{Principal, Role};
use nexus_core::{TenantId, UserId};
use nexus_infra::{NewUser, StoreError, UserRecord, UserUpdate};

use super::{
    CREATE_USERS, DELETE_USERS, MANAGE_ROLES, parse_role_id, parse_user_id, with_permissions, with_role,
};
use crate::dto::{
    AssignRoleRequest, CreateUserRequest, ListUsersQuery, MIN_PASSWORD_LEN, UpdateUserRequest, UserView,
    is_valid_email, present,
};
use crate::services::IdentityServices;

pub fn router() -> Router {
    Router::new()
        .route(
            "/",
            with_role(get(list_users), Role::ADMIN).merge(with_permissions(post(create_user), &[CREATE_USERS])),
        )
        .route(
            "/:id",
            get(get_user)
                .merge(put(update_user))
                .merge(with_permissions(delete(delete_user), &[DELETE_USERS])),
        )
        .route("/:id/roles", with_permissions(post(assign_role), &[MANAGE_ROLES]))
        .route("/:id/roles/:role_id", with_permissions(delete(remove_role), &[MANAGE_ROLES]))
}

/// Load a user the caller may see: admins see everyone, others themselves and their tenant.
async fn visible_user(
    services: &IdentityServices,
    principal: &Principal,
    user_id: UserId,
) -> ApiResult<UserRecord> {
    let user = services
        .store
        .find_user(user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let is_self = principal.id.user_id() == Some(user.id);
    if principal.is_admin() || is_self || principal.tenant_id == Some(user.tenant_id) {
        Ok(user)
    } else {
        Err(ApiError::not_found("User not found"))
    }
}

/// GET /users - admins only; `?tenantId=` narrows the list
pub async fn list_users(
    Extension(services): Extension<Arc<IdentityServices>>,
    Query(query): Query<ListUsersQuery>,
) -> ApiResult<Json<Value>> {
    let tenant_id = present(&query.tenant_id)
        .map(|raw| raw.parse::<TenantId>())
        .transpose()
        .map_err(|_| ApiError::validation("Invalid tenant"))?;

    let users = services.store.list_users(tenant_id).await?;
    let mut views = Vec::with_capacity(users.len());
    for user in &users {
        let roles = services.store.roles_for_user(user.id).await?;
        views.push(UserView::from(user).with_roles(&roles));
    }

    Ok(ok(json!({ "users": views })))
}

/// GET /users/:id
pub async fn get_user(
    Extension(services): Extension<Arc<IdentityServices>>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let user = visible_user(&services, &principal, parse_user_id(&id)?).await?;
    let roles = services.store.roles_for_user(user.id).await?;
    Ok(ok(json!({ "user": UserView::from(&user).with_roles(&roles) })))
}

/// POST /users - created in the caller's tenant, with `roleId` or the default role
pub async fn create_user(
    Extension(services): Extension<Arc<IdentityServices>>,
    CurrentPrincipal(principal): CurrentPrincipal,
    JsonBody(body): JsonBody<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let (Some(email), Some(password), Some(first_name), Some(last_name)) = (
        present(&body.email),
        body.password.as_deref().filter(|p| !p.is_empty()),
        present(&body.first_name),
        present(&body.last_name),
    ) else {
        return Err(ApiError::validation("All fields are required"));
    };
    let tenant_id = principal.tenant_id.ok_or_else(|| ApiError::validation("Invalid tenant"))?;

    let email = email.to_lowercase();
    if !is_valid_email(&email) {
        return Err(ApiError::validation("Invalid email format"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation("Password must be at least 6 characters long"));
    }
    if services.store.find_user_by_email(&email).await?.is_some() {
        return Err(ApiError::Conflict("User with this email already exists".to_string()));
    }

    let role = match present(&body.role_id) {
        Some(raw) => {
            let role_id = raw
                .parse()
                .map_err(|_| ApiError::validation("Invalid role"))?;
            Some(
                services
                    .store
                    .find_role(tenant_id, role_id)
                    .await?
                    .ok_or_else(|| ApiError::validation("Role does not belong to this tenant"))?,
            )
        }
        None => {
            services
                .store
                .find_role_by_name(tenant_id, Role::DEFAULT_USER.as_str())
                .await?
        }
    };

    let password_hash = services.hash_password(password.to_string()).await?;
    let user = services
        .store
        .create_user(
            NewUser {
                tenant_id,
                email,
                password_hash,
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
            },
            role.as_ref().map(|r| r.id),
        )
        .await?;
    if role.is_some() {
        services.resolver.invalidate(user.id).await;
    }

    info!(user_id = %user.id, created_by = %principal.id, tenant_id = %tenant_id, "user created");

    let roles: Vec<_> = role.into_iter().collect();
    Ok(created(json!({
        "message": "User created successfully",
        "user": UserView::from(&user).with_roles(&roles),
    })))
}

/// PUT /users/:id - self or same tenant; only admins change someone else's active flag
pub async fn update_user(
    Extension(services): Extension<Arc<IdentityServices>>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<UpdateUserRequest>,
) -> ApiResult<Json<Value>> {
    let first_name = present(&body.first_name).map(str::to_string);
    let last_name = present(&body.last_name).map(str::to_string);
    if first_name.is_none() && last_name.is_none() && body.is_active.is_none() {
        return Err(ApiError::validation("At least one field is required for update"));
    }

    let user = visible_user(&services, &principal, parse_user_id(&id)?).await?;
    let is_self = principal.id.user_id() == Some(user.id);
    if body.is_active.is_some() && !is_self && !principal.is_admin() {
        return Err(ApiError::InsufficientRole { required: Role::ADMIN });
    }

    let updated = services
        .store
        .update_user(
            user.id,
            UserUpdate {
                first_name,
                last_name,
                is_active: body.is_active,
            },
        )
        .await?;

    info!(user_id = %updated.id, updated_by = %principal.id, "user updated");
    Ok(ok(json!({
        "message": "User updated successfully",
        "user": UserView::from(&updated),
    })))
}

/// DELETE /users/:id
pub async fn delete_user(
    Extension(services): Extension<Arc<IdentityServices>>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let user = visible_user(&services, &principal, parse_user_id(&id)?).await?;
    if principal.id.user_id() == Some(user.id) {
        return Err(ApiError::validation("Cannot delete your own account"));
    }

    services.store.delete_user(user.id).await?;
    services.resolver.invalidate(user.id).await;

    info!(user_id = %user.id, deleted_by = %principal.id, "user deleted");
    Ok(ok_message("User deleted successfully"))
}

/// POST /users/:id/roles
pub async fn assign_role(
    Extension(services): Extension<Arc<IdentityServices>>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<AssignRoleRequest>,
) -> ApiResult<Json<Value>> {
    let role_id = present(&body.role_id).ok_or_else(|| ApiError::validation("roleId is required"))?;
    let role_id = parse_role_id(role_id)?;

    let user = visible_user(&services, &principal, parse_user_id(&id)?).await?;
    let role = services
        .store
        .find_role(user.tenant_id, role_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Role not found"))?;

    services
        .store
        .assign_role(user.id, role.id)
        .await
        .map_err(|e| match e {
            StoreError::Conflict(_) => ApiError::Conflict("Role already assigned to user".to_string()),
            other => other.into(),
        })?;
    services.resolver.invalidate(user.id).await;

    info!(user_id = %user.id, role = %role.name, assigned_by = %principal.id, "role assigned");
    Ok(ok_message("Role assigned successfully"))
}

/// DELETE /users/:id/roles/:role_id
pub async fn remove_role(
    Extension(services): Extension<Arc<IdentityServices>>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path((id, role_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let user = visible_user(&services, &principal, parse_user_id(&id)?).await?;
    let role = services
        .store
        .find_role(user.tenant_id, parse_role_id(&role_id)?)
        .await?
        .ok_or_else(|| ApiError::not_found("Role not found"))?;

    services.store.remove_role(user.id, role.id).await?;
    services.resolver.invalidate(user.id).await;

    info!(user_id = %user.id, role = %role.name, removed_by = %principal.id, "role removed");
    Ok(ok_message("Role removed successfully"))
}
