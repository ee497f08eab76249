//! `/auth`: credential exchange and token refresh.

use std::sync::Arc;

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing::{info, warn};

use nexus_api::{ApiError, ApiResult, CurrentPrincipal, JsonBody, created, ok};
use nexus_auth::{Role, TokenVerifier};
use nexus_core::TenantId;
use nexus_infra::NewUser;

use crate::dto::{
    LoginRequest, MIN_PASSWORD_LEN, RefreshRequest, RegisterRequest, ServiceTokenRequest, SessionUser,
    is_valid_email, present,
};
use crate::services::IdentityServices;

/// Routes that need no token.
pub fn public_router() -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/register", post(register))
        .route("/refresh", post(refresh))
        .route("/service-token", post(service_token))
}

/// Routes behind the authenticate stage.
pub fn protected_router() -> Router {
    Router::new().route("/profile", get(profile))
}

/// POST /auth/login
pub async fn login(
    Extension(services): Extension<Arc<IdentityServices>>,
    JsonBody(body): JsonBody<LoginRequest>,
) -> ApiResult<Json<Value>> {
    let (Some(email), Some(password)) = (present(&body.email), body.password.as_deref()) else {
        return Err(ApiError::validation("Email and password are required"));
    };
    if password.is_empty() {
        return Err(ApiError::validation("Email and password are required"));
    }
    let email = email.to_lowercase();

    // Unknown, inactive and wrong-password all look the same to the caller.
    let user = match services.store.find_user_by_email(&email).await? {
        Some(user) if user.is_active => user,
        _ => return Err(ApiError::InvalidCredentials),
    };
    if !services
        .verify_password(password.to_string(), user.password_hash.clone())
        .await
    {
        warn!(user_id = %user.id, "login with wrong password");
        return Err(ApiError::InvalidCredentials);
    }

    let profile = services.resolver.access_profile(user.id).await?;
    let issued = services.issue_user_token(&user, &profile)?;
    services.store.record_login(user.id).await?;

    info!(user_id = %user.id, tenant_id = %user.tenant_id, "user logged in");

    Ok(ok(json!({
        "accessToken": issued.token,
        "user": SessionUser {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            tenant_id: user.tenant_id,
            roles: profile.roles,
            permissions: profile.permission_objects,
        },
    })))
}

/// POST /auth/register
pub async fn register(
    Extension(services): Extension<Arc<IdentityServices>>,
    JsonBody(body): JsonBody<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let (Some(email), Some(password), Some(first_name), Some(last_name), Some(tenant_id)) = (
        present(&body.email),
        body.password.as_deref().filter(|p| !p.is_empty()),
        present(&body.first_name),
        present(&body.last_name),
        present(&body.tenant_id),
    ) else {
        return Err(ApiError::validation("All fields are required"));
    };

    let email = email.to_lowercase();
    if !is_valid_email(&email) {
        return Err(ApiError::validation("Invalid email format"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation("Password must be at least 6 characters long"));
    }
    let tenant_id: TenantId = tenant_id
        .parse()
        .map_err(|_| ApiError::validation("Invalid tenant"))?;

    if services.store.find_user_by_email(&email).await?.is_some() {
        return Err(ApiError::Conflict("User with this email already exists".to_string()));
    }

    let password_hash = services.hash_password(password.to_string()).await?;
    let default_role = services
        .store
        .find_role_by_name(tenant_id, Role::DEFAULT_USER.as_str())
        .await?;

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
            default_role.as_ref().map(|r| r.id),
        )
        .await?;
    if default_role.is_some() {
        services.resolver.invalidate(user.id).await;
    }

    info!(user_id = %user.id, tenant_id = %tenant_id, "user registered");

    Ok(created(json!({
        "message": "User registered successfully",
        "user": {
            "id": user.id,
            "email": user.email,
            "firstName": user.first_name,
            "lastName": user.last_name,
            "tenantId": user.tenant_id,
        },
    })))
}

/// POST /auth/refresh
///
/// Re-resolves the profile from the credential store so revoked grants drop
/// out, and refuses users that were deleted or deactivated.
pub async fn refresh(
    Extension(services): Extension<Arc<IdentityServices>>,
    JsonBody(body): JsonBody<RefreshRequest>,
) -> ApiResult<Json<Value>> {
    let token = present(&body.refresh_token).ok_or_else(|| ApiError::validation("Refresh token is required"))?;

    let claims = services.tokens.verify(token).map_err(|e| {
        warn!(reason = e.reason(), "refresh with unusable token");
        ApiError::from(e)
    })?;
    let user_id = claims.user_id.user_id().ok_or(ApiError::InactiveUser)?;
    let user = services.active_user(user_id).await?.ok_or(ApiError::InactiveUser)?;

    let profile = services.resolver.fresh_profile(user.id).await?;
    let issued = services.issue_user_token(&user, &profile)?;

    Ok(ok(json!({
        "accessToken": issued.token,
        "user": SessionUser {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            tenant_id: user.tenant_id,
            roles: profile.roles,
            permissions: profile.permission_objects,
        },
    })))
}

/// POST /auth/service-token
pub async fn service_token(
    Extension(services): Extension<Arc<IdentityServices>>,
    JsonBody(body): JsonBody<ServiceTokenRequest>,
) -> ApiResult<Json<Value>> {
    let (Some(client_id), Some(client_secret)) = (present(&body.client_id), present(&body.client_secret)) else {
        return Err(ApiError::validation("clientId and clientSecret are required"));
    };

    let issued = services
        .tokens
        .issue_service_token(client_id, client_secret)
        .map_err(|e| {
            warn!(client_id, reason = e.reason(), "service token request rejected");
            ApiError::from(e)
        })?;

    info!(client_id, "service token issued");

    Ok(ok(json!({
        "accessToken": issued.token,
        "tokenType": "Bearer",
        "expiresIn": issued.expires_in_secs(),
    })))
}

/// GET /auth/profile
pub async fn profile(CurrentPrincipal(principal): CurrentPrincipal) -> impl IntoResponse {
    ok(json!({ "user": principal }))
}
