//! HTTP application wiring for the identity service.

use std::sync::Arc;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::get;
use axum::{Extension, Router};

use nexus_api::cors::cors_layer;
use nexus_api::middleware::{
    AuthState, PermissionRequirement, TenantBinding, authenticate, bind_tenant, expose_internal_errors,
    log_requests, request_id, require_permissions,
};
use nexus_auth::Permission;

use crate::config::IdentityConfig;
use crate::middleware::require_active_user;
use crate::routes::{self, MANAGE_ROLES};
use crate::services::IdentityServices;

/// Build the full identity router.
pub fn build_app(services: Arc<IdentityServices>, config: &IdentityConfig) -> Router {
    let auth_state = AuthState::new(services.tokens.clone()).with_cookie(config.service_token_cookie.as_str());

    // Role administration is scoped to the caller's home tenant.
    let roles = routes::roles::router()
        .route_layer(from_fn_with_state(
            Arc::new(PermissionRequirement::all([Permission::new(MANAGE_ROLES)])),
            require_permissions,
        ))
        .route_layer(from_fn_with_state(TenantBinding::claim_only(), bind_tenant));

    // route_layer wraps outside-in: authenticate runs first, then the active-user check.
    let protected = Router::new()
        .nest("/auth", routes::auth::protected_router())
        .nest("/users", routes::users::router())
        .nest("/roles", roles)
        .route_layer(from_fn_with_state(services.clone(), require_active_user))
        .route_layer(from_fn_with_state(auth_state, authenticate));

    let mut app = Router::new()
        .route("/health", get(routes::system::health))
        .nest("/auth", routes::auth::public_router())
        .merge(protected)
        .fallback(routes::system::not_found)
        .layer(Extension(services.clone()));

    if config.environment.is_development() {
        app = app.layer(from_fn(expose_internal_errors));
    }

    app.layer(cors_layer(&config.cors_origins))
        .layer(from_fn(log_requests))
        .layer(from_fn(request_id))
}
