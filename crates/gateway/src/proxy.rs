//! Forwarding to backends.
//!
//! Every outbound call, whether it proxies a client request or originates in
//! the gateway itself, goes through [`ProxyClient::forward`] with an explicit
//! [`ForwardRequest`]. Backend responses, error statuses included, are passed
//! through; only transport failures become `502`.

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use axum::response::Response;
use thiserror::Error;
use tracing::{debug, error, warn};

use nexus_api::middleware::TENANT_HEADER;
use nexus_api::{ApiError, TenantContext};
use nexus_auth::Principal;

use crate::config::ServiceUrls;
use crate::routes::Backend;

pub const X_GATEWAY: HeaderName = HeaderName::from_static("x-gateway");
pub const GATEWAY_NAME: &str = "Nexus-API-Gateway";

pub const X_USER_ID: HeaderName = HeaderName::from_static("x-user-id");
pub const X_USER_EMAIL: HeaderName = HeaderName::from_static("x-user-email");
pub const X_USER_PERMISSIONS: HeaderName = HeaderName::from_static("x-user-permissions");
pub const X_TENANT_CONTEXT: HeaderName = HeaderName::from_static("x-tenant-context");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Client headers a backend gets to see. Everything else, in particular any
/// client-supplied `X-User-*` or `X-Tenant-*`, is dropped.
const PASSTHROUGH: &[&str] = &[
    "authorization",
    "cookie",
    "content-type",
    "accept",
    "user-agent",
    "x-request-id",
];

/// Response headers that describe the backend connection, not the payload.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "content-length",
    "keep-alive",
    "proxy-authenticate",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("backend did not answer within {0:?}")]
    Timeout(Duration),

    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),

    #[error("failed to read backend response: {0}")]
    Body(String),
}

impl From<ProxyError> for ApiError {
    fn from(_: ProxyError) -> Self {
        ApiError::ServiceUnavailable
    }
}

/// One outbound call, spelled out.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    /// Backend-relative path, query string included.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ForwardRequest {
    pub fn new(method: Method, path_and_query: impl Into<String>) -> Self {
        Self {
            method,
            path_and_query: path_and_query.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// How the caller reached the gateway, for the `X-Forwarded-*` headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardedFor {
    pub client_ip: String,
    pub proto: String,
    pub host: Option<String>,
}

#[derive(Clone)]
pub struct ProxyClient {
    http: reqwest::Client,
    services: ServiceUrls,
    timeout: Duration,
}

impl ProxyClient {
    pub fn new(services: ServiceUrls, timeout: Duration) -> Result<Self, ProxyError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;
        Ok(Self {
            http,
            services,
            timeout,
        })
    }

    pub fn services(&self) -> &ServiceUrls {
        &self.services
    }

    /// Send `req` to `backend` and relay whatever comes back.
    ///
    /// Transport failures are logged with the real cause and returned as
    /// [`ProxyError`]; the caller only ever sees a generic `502`.
    pub async fn forward(&self, backend: Backend, req: ForwardRequest) -> Result<Response, ProxyError> {
        let url = format!("{}{}", self.services.url_for(backend), req.path_and_query);
        debug!(backend = backend.name(), method = %req.method, %url, "forwarding");

        let result = self
            .http
            .request(req.method, &url)
            .headers(req.headers)
            .body(req.body)
            .send()
            .await;

        let upstream = match result {
            Ok(res) => res,
            Err(e) => {
                let err = self.classify(e);
                error!(backend = backend.name(), %url, error = %err, "proxy error");
                return Err(err);
            }
        };

        let status = upstream.status();
        let headers = upstream.headers().clone();
        let body = upstream.bytes().await.map_err(|e| {
            let err = ProxyError::Body(e.to_string());
            error!(backend = backend.name(), %url, error = %err, "proxy error");
            err
        })?;

        if status.is_server_error() {
            warn!(backend = backend.name(), %url, status = status.as_u16(), "backend returned an error");
        }

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        for (name, value) in &headers {
            if !HOP_BY_HOP.contains(&name.as_str()) {
                response.headers_mut().append(name.clone(), value.clone());
            }
        }
        response
            .headers_mut()
            .insert(X_GATEWAY, HeaderValue::from_static(GATEWAY_NAME));
        Ok(response)
    }

    fn classify(&self, err: reqwest::Error) -> ProxyError {
        if err.is_timeout() {
            ProxyError::Timeout(self.timeout)
        } else if err.is_builder() {
            ProxyError::InvalidRequest(err.to_string())
        } else {
            ProxyError::Unreachable(err.to_string())
        }
    }
}

impl core::fmt::Debug for ProxyClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProxyClient")
            .field("services", &self.services)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Headers for a forwarded client request: the passthrough subset of the
/// client's headers plus forwarding and identity headers set by the gateway.
pub fn forward_headers(
    incoming: &HeaderMap,
    via: &ForwardedFor,
    principal: Option<&Principal>,
    tenant: Option<&TenantContext>,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for &name in PASSTHROUGH {
        for value in incoming.get_all(name) {
            headers.append(HeaderName::from_static(name), value.clone());
        }
    }

    set(&mut headers, X_FORWARDED_FOR, &via.client_ip);
    set(&mut headers, X_FORWARDED_PROTO, &via.proto);
    if let Some(host) = &via.host {
        set(&mut headers, X_FORWARDED_HOST, host);
    }

    if let Some(principal) = principal {
        set_identity(&mut headers, principal, tenant);
    }
    headers
}

/// `X-User-*` and `X-Tenant-*` for `principal`, bound to `tenant` when known.
pub fn set_identity(headers: &mut HeaderMap, principal: &Principal, tenant: Option<&TenantContext>) {
    set(headers, X_USER_ID, &principal.id.to_string());
    set(headers, X_USER_EMAIL, &principal.email);
    match serde_json::to_string(&principal.permissions) {
        Ok(perms) => set(headers, X_USER_PERMISSIONS, &perms),
        Err(e) => warn!(error = %e, "failed to encode permissions header"),
    }

    let tenant_id = tenant.map(TenantContext::tenant_id).or(principal.tenant_id);
    if let Some(tenant_id) = tenant_id {
        set(headers, HeaderName::from_static(TENANT_HEADER), &tenant_id.to_string());
    }
    if let Some(ctx) = tenant {
        match serde_json::to_string(ctx) {
            Ok(json) => set(headers, X_TENANT_CONTEXT, &json),
            Err(e) => warn!(error = %e, "failed to encode tenant context header"),
        }
    }
}

fn set(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(_) => warn!(header = %name, "dropping header with non-visible characters"),
    }
}
