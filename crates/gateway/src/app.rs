//! HTTP application wiring for the gateway.

use std::sync::Arc;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{any, get};
use axum::{Extension, Router};

use nexus_api::cors::cors_layer;
use nexus_api::middleware::{
    AuthState, authenticate, bind_tenant, expose_internal_errors, log_requests, optional_auth, request_id,
    require_permissions,
};

use crate::handlers;
use crate::middleware::{client_ip, gateway_header, rate_limit};
use crate::routes::{AuthMode, ServiceRoute, route_table};
use crate::services::GatewayServices;

/// Build the full gateway router.
pub fn build_app(services: Arc<GatewayServices>) -> Router {
    let auth_state = AuthState::new(services.tokens.clone())
        .with_cookie(services.config.service_token_cookie.as_str());

    let mut app = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/internal/debug/proxy-tenants", get(handlers::debug_proxy_tenants));

    for route in route_table() {
        app = app.merge(service_router(route, &auth_state, &services));
    }

    // Layers run outermost-last: the client IP is resolved before the budget check.
    let mut app = app
        .fallback(handlers::not_found)
        .layer(Extension(services.clone()))
        .layer(from_fn_with_state(services.clone(), rate_limit))
        .layer(from_fn_with_state(services.clone(), client_ip))
        .layer(from_fn(gateway_header));

    if services.config.environment.is_development() {
        app = app.layer(from_fn(expose_internal_errors));
    }

    app.layer(cors_layer(&services.config.cors_origins))
        .layer(from_fn(log_requests))
        .layer(from_fn(request_id))
}

/// `prefix` and everything below it, behind the route's own chain:
/// authenticate, then bind the tenant, then check permissions.
fn service_router(route: ServiceRoute, auth_state: &AuthState, services: &GatewayServices) -> Router {
    let mut router = Router::new()
        .route(route.prefix, any(handlers::proxy))
        .route(&format!("{}/*rest", route.prefix), any(handlers::proxy));

    if !route.permissions.is_empty() {
        router = router.route_layer(from_fn_with_state(Arc::new(route.permissions.clone()), require_permissions));
    }
    if route.tenant_scoped {
        router = router.route_layer(from_fn_with_state(services.tenants.clone(), bind_tenant));
    }
    router = match route.auth {
        AuthMode::Required => router.route_layer(from_fn_with_state(auth_state.clone(), authenticate)),
        AuthMode::Optional => router.route_layer(from_fn_with_state(auth_state.clone(), optional_auth)),
    };

    router.route_layer(Extension(Arc::new(route)))
}
