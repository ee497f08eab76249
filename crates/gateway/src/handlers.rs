use std::sync::Arc;

use axum::Json;
use axum::body::to_bytes;
use axum::extract::{Extension, Request};
use axum::http::{HeaderValue, Method, Uri, header};
use axum::response::Response;
use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use nexus_api::{ApiError, TenantContext};
use nexus_auth::{Permission, Principal, PrincipalId, TokenKind, TokenSubject};

use crate::middleware::{ClientIp, PeerAddr};
use crate::proxy::{ForwardRequest, ForwardedFor, X_FORWARDED_PROTO, forward_headers, set_identity};
use crate::routes::{Backend, ServiceRoute, route_table};
use crate::services::GatewayServices;

/// Largest request body the gateway buffers before forwarding.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub const DEBUG_PERMISSION: &str = "tenant:read:tenants";

/// ANY /api/v1/<service>/* - forward to the backend owning the prefix
pub async fn proxy(
    Extension(services): Extension<Arc<GatewayServices>>,
    Extension(route): Extension<Arc<ServiceRoute>>,
    principal: Option<Extension<Principal>>,
    tenant: Option<Extension<TenantContext>>,
    client: Option<Extension<ClientIp>>,
    req: Request,
) -> Result<Response, ApiError> {
    let (parts, body) = req.into_parts();

    let mut path_and_query = route.rewrite_path(parts.uri.path());
    if let Some(query) = parts.uri.query() {
        path_and_query.push('?');
        path_and_query.push_str(query);
    }

    let proto = services
        .config
        .trust_proxy
        .then(|| parts.headers.get(X_FORWARDED_PROTO))
        .flatten()
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http")
        .to_string();
    let via = ForwardedFor {
        client_ip: client.map(|Extension(c)| c.0).unwrap_or_default(),
        proto,
        host: parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
    };

    let headers = forward_headers(
        &parts.headers,
        &via,
        principal.as_ref().map(|Extension(p)| p),
        tenant.as_ref().map(|Extension(t)| t),
    );

    let body = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::validation(format!("Unreadable request body: {e}")))?;

    let forward = ForwardRequest {
        method: parts.method,
        path_and_query,
        headers,
        body,
    };
    Ok(services.proxy.forward(route.backend, forward).await?)
}

/// GET / - service banner
pub async fn root() -> Json<Value> {
    let mut endpoints = Map::new();
    endpoints.insert("health".into(), json!("/health"));
    for route in route_table() {
        let name = route.prefix.trim_start_matches("/api/v1/");
        endpoints.insert(name.into(), json!(format!("{}/*", route.prefix)));
    }

    Json(json!({
        "service": "Nexus API Gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "operational",
        "endpoints": endpoints,
    }))
}

/// GET /health - the gateway itself; backends report their own health
pub async fn health(Extension(services): Extension<Arc<GatewayServices>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now(),
        "uptime": services.uptime_secs(),
        "environment": services.config.environment.as_str(),
        "version": env!("CARGO_PKG_VERSION"),
        "services": {
            "cache": services.cache_status().await,
        },
    }))
}

/// GET /internal/debug/proxy-tenants - development only, from localhost only.
///
/// Calls the tenant service with a short-lived token carrying nothing but
/// `tenant:read:tenants`, to check gateway-to-backend wiring end to end.
pub async fn debug_proxy_tenants(
    Extension(services): Extension<Arc<GatewayServices>>,
    peer: Option<Extension<PeerAddr>>,
    method: Method,
    uri: Uri,
) -> Result<Response, ApiError> {
    if !services.config.environment.is_development() {
        return Err(ApiError::RouteNotFound {
            method,
            path: uri.path().to_string(),
        });
    }

    let peer = peer.and_then(|Extension(PeerAddr(addr))| addr);
    if !peer.is_some_and(|addr| addr.ip().is_loopback()) {
        warn!(peer = ?peer, "debug endpoint called from a non-local address");
        return Err(ApiError::Forbidden(
            "Forbidden - debug endpoint restricted to localhost".to_string(),
        ));
    }

    let issued = services.tokens.issue(
        TokenSubject {
            id: PrincipalId::Service("gateway-debug".to_string()),
            tenant_id: None,
            email: "debug@nexus.local".to_string(),
            roles: Vec::new(),
            permissions: vec![Permission::new(DEBUG_PERMISSION)],
        },
        TokenKind::Debug,
    )?;
    info!(expires_in = issued.expires_in_secs(), "minted debug token");

    let mut req = ForwardRequest::new(Method::GET, "/tenants");
    let bearer = HeaderValue::from_str(&format!("Bearer {}", issued.token))
        .map_err(|e| ApiError::internal(format!("debug token is not a valid header: {e}")))?;
    req.headers.insert(header::AUTHORIZATION, bearer);
    req.headers
        .insert(header::ACCEPT, HeaderValue::from_static("application/json"));
    set_identity(&mut req.headers, &Principal::from(issued.claims), None);

    Ok(services.proxy.forward(Backend::Tenant, req).await?)
}

pub async fn not_found(method: Method, uri: Uri) -> ApiError {
    ApiError::RouteNotFound {
        method,
        path: uri.path().to_string(),
    }
}
