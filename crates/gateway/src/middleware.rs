use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use nexus_api::ApiError;
use nexus_infra::RateDecision;

use crate::proxy::{GATEWAY_NAME, X_FORWARDED_FOR, X_GATEWAY};
use crate::routes::is_strict;
use crate::services::GatewayServices;

/// Address the request is attributed to, for rate limiting and forwarding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

/// Socket peer of the connection, whatever the forwarding headers claim.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PeerAddr(pub Option<SocketAddr>);

/// Socket peer, or with a trusted proxy in front the `X-Forwarded-For` hop
/// that proxy appended. Earlier hops are client-supplied and never used.
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    if trust_proxy {
        let proxy_hop = headers
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty());
        if let Some(hop) = proxy_hop {
            return hop.to_string();
        }
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn client_ip(State(services): State<Arc<GatewayServices>>, mut req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = resolve_client_ip(req.headers(), peer, services.config.trust_proxy);

    req.extensions_mut().insert(PeerAddr(peer));
    req.extensions_mut().insert(ClientIp(ip));
    next.run(req).await
}

/// Per-IP budgets. Every request counts against the default budget; login,
/// registration and token exchange also count against the strict one.
pub async fn rate_limit(
    State(services): State<Arc<GatewayServices>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = req
        .extensions()
        .get::<ClientIp>()
        .map(|c| c.0.clone())
        .unwrap_or_else(|| "unknown".to_string());
    let path = req.uri().path().to_owned();
    let limits = services.config.rate_limits;

    let mut checks = vec![("default", limits.default)];
    if is_strict(&path) {
        checks.push(("auth", limits.auth));
    }

    for (scope, rule) in checks {
        if let RateDecision::Limited { retry_after_secs } = services.limiter.check(scope, &ip, rule).await {
            let user_agent = req
                .headers()
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            warn!(ip = %ip, path = %path, scope, user_agent, "rate limit exceeded");
            return Err(ApiError::RateLimitExceeded { retry_after_secs });
        }
    }

    Ok(next.run(req).await)
}

/// Stamp every response, including the gateway's own errors.
pub async fn gateway_header(req: Request, next: Next) -> Response {
    let mut res = next.run(req).await;
    res.headers_mut()
        .insert(X_GATEWAY, HeaderValue::from_static(GATEWAY_NAME));
    res
}
