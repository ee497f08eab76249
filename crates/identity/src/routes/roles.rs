//! `/roles`: tenant role administration. Every route requires `identity:manage:roles`.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing::info;

use nexus_api::{ApiError, ApiResult, CurrentTenant, JsonBody, created, ok, ok_message};
use nexus_auth::PermissionRecord;
use nexus_core::{PermissionId, RoleId};
use nexus_infra::{NewRole, RoleRecord, RoleUpdate};

use super::parse_role_id;
use crate::dto::{CreateRoleRequest, RoleView, UpdateRoleRequest, present};
use crate::services::IdentityServices;

/// Unguarded; the app wraps it in tenant binding and the permission check.
pub fn router() -> Router {
    Router::new()
        .route("/", get(list_roles).post(create_role))
        .route("/permissions/all", get(list_permissions))
        .route("/:id", get(get_role).put(update_role).delete(delete_role))
}

fn parse_permission_ids(raw: &[String]) -> ApiResult<Vec<PermissionId>> {
    raw.iter()
        .map(|id| {
            id.parse()
                .map_err(|_| ApiError::validation(format!("Invalid permission id '{id}'")))
        })
        .collect()
}

async fn view(services: &IdentityServices, role: RoleRecord) -> ApiResult<RoleView> {
    let permissions = services.store.role_permissions(role.id).await?;
    Ok(RoleView { role, permissions })
}

async fn tenant_role(services: &IdentityServices, tenant: &CurrentTenant, role_id: RoleId) -> ApiResult<RoleRecord> {
    services
        .store
        .find_role(tenant.0.tenant_id(), role_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Role not found"))
}

/// GET /roles - roles of the bound tenant with their permissions
pub async fn list_roles(
    Extension(services): Extension<Arc<IdentityServices>>,
    CurrentTenant(tenant): CurrentTenant,
) -> ApiResult<Json<Value>> {
    let roles = services.store.list_roles(tenant.tenant_id()).await?;
    let mut views = Vec::with_capacity(roles.len());
    for role in roles {
        views.push(view(&services, role).await?);
    }
    Ok(ok(json!({ "roles": views })))
}

/// GET /roles/:id
pub async fn get_role(
    Extension(services): Extension<Arc<IdentityServices>>,
    tenant: CurrentTenant,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let role = tenant_role(&services, &tenant, parse_role_id(&id)?).await?;
    Ok(ok(json!({ "role": view(&services, role).await? })))
}

/// POST /roles
pub async fn create_role(
    Extension(services): Extension<Arc<IdentityServices>>,
    CurrentTenant(tenant): CurrentTenant,
    JsonBody(body): JsonBody<CreateRoleRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let name = present(&body.name).ok_or_else(|| ApiError::validation("Role name is required"))?;
    let permission_ids = parse_permission_ids(&body.permission_ids)?;

    let role = services
        .store
        .create_role(NewRole {
            tenant_id: tenant.tenant_id(),
            name: name.to_string(),
            description: present(&body.description).map(str::to_string),
            permission_ids,
        })
        .await?;

    info!(role_id = %role.id, name = %role.name, created_by = %tenant.user_id(), "role created");
    Ok(created(json!({
        "message": "Role created successfully",
        "role": view(&services, role).await?,
    })))
}

/// PUT /roles/:id - every holder's cached profile is dropped afterwards
pub async fn update_role(
    Extension(services): Extension<Arc<IdentityServices>>,
    CurrentTenant(tenant): CurrentTenant,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<UpdateRoleRequest>,
) -> ApiResult<Json<Value>> {
    let role_id = parse_role_id(&id)?;
    let update = RoleUpdate {
        name: present(&body.name).map(str::to_string),
        description: body.description.map(|d| d.trim().to_string()),
        permission_ids: body
            .permission_ids
            .as_deref()
            .map(parse_permission_ids)
            .transpose()?,
    };
    if update.name.is_none() && update.description.is_none() && update.permission_ids.is_none() {
        return Err(ApiError::validation("At least one field is required for update"));
    }

    let change = services
        .store
        .update_role(tenant.tenant_id(), role_id, update)
        .await?;
    services.resolver.invalidate_all(change.holders.iter().copied()).await;

    info!(
        role_id = %change.role.id,
        holders = change.holders.len(),
        updated_by = %tenant.user_id(),
        "role updated"
    );
    Ok(ok(json!({
        "message": "Role updated successfully",
        "role": view(&services, change.role).await?,
    })))
}

/// DELETE /roles/:id - refused while any user holds the role
pub async fn delete_role(
    Extension(services): Extension<Arc<IdentityServices>>,
    CurrentTenant(tenant): CurrentTenant,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let role_id = parse_role_id(&id)?;
    services.store.delete_role(tenant.tenant_id(), role_id).await?;

    info!(role_id = %role_id, deleted_by = %tenant.user_id(), "role deleted");
    Ok(ok_message("Role deleted successfully"))
}

/// GET /roles/permissions/all - flat and grouped by module
pub async fn list_permissions(Extension(services): Extension<Arc<IdentityServices>>) -> ApiResult<Json<Value>> {
    let mut permissions = services.store.list_permissions().await?;
    permissions.sort_by(|a, b| {
        (&a.module, &a.action, &a.resource).cmp(&(&b.module, &b.action, &b.resource))
    });

    let mut grouped: BTreeMap<&str, Vec<&PermissionRecord>> = BTreeMap::new();
    for permission in &permissions {
        grouped.entry(permission.module.as_str()).or_default().push(permission);
    }

    Ok(ok(json!({
        "permissions": permissions,
        "groupedPermissions": grouped,
    })))
}
