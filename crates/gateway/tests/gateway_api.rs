//! Black-box tests: the real gateway router in front of a stub backend that
//! echoes what it received, both on ephemeral ports.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::routing::get;
use reqwest::header::RETRY_AFTER;
use serde_json::{Value, json};

use nexus_api::middleware::TenantBinding;
use nexus_auth::{
    MembershipStatus, Permission, PrincipalId, Role, TenantMembership, TokenKind, TokenService, TokenSubject,
};
use nexus_core::{TenantId, UserId};
use nexus_gateway::{GatewayConfig, GatewayServices, build_app};
use nexus_infra::{EnvSource, InMemoryCache, InMemoryMembershipStore};

/// Nothing listens on the discard port.
const DEAD_BACKEND: &str = "http://127.0.0.1:9";

const ECHOED: &[&str] = &[
    "authorization",
    "content-type",
    "x-user-id",
    "x-user-email",
    "x-user-permissions",
    "x-tenant-id",
    "x-tenant-context",
    "x-forwarded-for",
    "x-forwarded-proto",
    "x-request-id",
];

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Value> {
    let seen: serde_json::Map<String, Value> = ECHOED
        .iter()
        .filter_map(|name| {
            let value = headers.get(*name)?.to_str().ok()?;
            Some((name.to_string(), json!(value)))
        })
        .collect();
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "headers": seen,
        "body": String::from_utf8_lossy(&body),
    }))
}

async fn spawn_backend() -> (String, tokio::task::JoinHandle<()>) {
    let app = axum::Router::new()
        .route(
            "/payroll/fail",
            get(|| async {
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(json!({ "error": "Validation failed", "fields": ["period"] })),
                )
            }),
        )
        .fallback(echo);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), handle)
}

struct TestServer {
    base_url: String,
    gateway: tokio::task::JoinHandle<()>,
    backend: tokio::task::JoinHandle<()>,
    tokens: TokenService,
    memberships: Arc<InMemoryMembershipStore>,
    client: reqwest::Client,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(&[]).await
    }

    async fn spawn_with(overrides: &[(&str, &str)]) -> Self {
        let (backend_url, backend) = spawn_backend().await;

        let mut pairs = vec![
            ("APP_ENV".to_string(), "test".to_string()),
            ("IDENTITY_SERVICE_URL".to_string(), backend_url.clone()),
            ("TENANT_SERVICE_URL".to_string(), backend_url.clone()),
            ("PAYROLL_SERVICE_URL".to_string(), backend_url.clone()),
            ("CONNECTOR_SERVICE_URL".to_string(), DEAD_BACKEND.to_string()),
            ("PROXY_TIMEOUT_SECS".to_string(), "2".to_string()),
        ];
        pairs.extend(overrides.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        let config = GatewayConfig::from_env(&EnvSource::from_pairs(pairs)).unwrap();

        let tokens = TokenService::new(config.token.clone());
        let memberships = Arc::new(InMemoryMembershipStore::new());
        let services = GatewayServices::new(
            config,
            Arc::new(InMemoryCache::new()),
            TenantBinding::verified(memberships.clone()),
        )
        .unwrap();
        let app = build_app(Arc::new(services));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let gateway = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            gateway,
            backend,
            tokens,
            memberships,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn token_for(&self, user: UserId, tenant: Option<TenantId>, roles: &[&'static str], perms: &[&'static str]) -> String {
        self.tokens
            .issue(
                TokenSubject {
                    id: PrincipalId::User(user),
                    tenant_id: tenant,
                    email: "ops@nexus.lk".into(),
                    roles: roles.iter().map(|r| Role::new(*r)).collect(),
                    permissions: perms.iter().map(|p| Permission::new(*p)).collect(),
                },
                TokenKind::User,
            )
            .unwrap()
            .token
    }

    fn token(&self, tenant: Option<TenantId>, roles: &[&'static str], perms: &[&'static str]) -> String {
        self.token_for(UserId::new(), tenant, roles, perms)
    }

    async fn call(&self, req: reqwest::RequestBuilder) -> (StatusCode, HeaderMap, Value) {
        let res = req.send().await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        (status, headers, res.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str, token: Option<&str>) -> (StatusCode, HeaderMap, Value) {
        let mut req = self.client.get(self.url(path));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        self.call(req).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.gateway.abort();
        self.backend.abort();
    }
}

#[tokio::test]
async fn missing_and_invalid_tokens_are_401() {
    let server = TestServer::spawn().await;

    let (status, _, body) = server.get("/api/v1/payroll/runs", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Access token required");

    let (status, _, body) = server.get("/api/v1/payroll/runs", Some("not.a.token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid or expired token");
}

#[tokio::test]
async fn method_specific_permissions_are_enforced() {
    let server = TestServer::spawn().await;
    let token = server.token(Some(TenantId::new()), &["employee"], &["payroll:read:payroll"]);

    let (status, _, _) = server.get("/api/v1/payroll/runs", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body) = server
        .call(server.client.post(server.url("/api/v1/payroll/runs")).bearer_auth(&token).json(&json!({})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Insufficient permissions");
    assert_eq!(body["required"], json!(["payroll:read:payroll", "payroll:create:payroll"]));
}

#[tokio::test]
async fn admin_request_is_forwarded_with_identity_headers() {
    let server = TestServer::spawn().await;
    let tenant = TenantId::new();
    let user = UserId::new();
    let token = server.token_for(user, Some(tenant), &["admin"], &[]);

    let (status, headers, body) = server
        .call(
            server
                .client
                .post(server.url("/api/v1/payroll/runs?period=2024-06"))
                .bearer_auth(&token)
                .header("x-user-id", "intruder")
                .header("x-user-permissions", "[\"payroll:delete:payroll\"]")
                .header("x-forwarded-for", "198.51.100.20")
                .json(&json!({ "period": "2024-06" })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-gateway"], "Nexus-API-Gateway");
    assert!(headers.contains_key("x-request-id"));
    assert_eq!(body["method"], "POST");
    assert_eq!(body["path"], "/payroll/runs");
    assert_eq!(body["query"], "period=2024-06");
    assert_eq!(body["body"], "{\"period\":\"2024-06\"}");

    let seen = &body["headers"];
    assert_eq!(seen["x-user-id"], user.to_string());
    assert_eq!(seen["x-user-email"], "ops@nexus.lk");
    assert_eq!(seen["x-user-permissions"], "[]");
    assert_eq!(seen["x-tenant-id"], tenant.to_string());
    // No trusted proxy in front: the client-sent hop is replaced by the peer.
    assert_eq!(seen["x-forwarded-for"], "127.0.0.1");
    assert_eq!(seen["authorization"], format!("Bearer {token}"));
    assert_eq!(seen["content-type"], "application/json");

    let context: Value = serde_json::from_str(seen["x-tenant-context"].as_str().unwrap()).unwrap();
    assert_eq!(context["tenantId"], tenant.to_string());
    assert_eq!(context["userRole"], "admin");
}

#[tokio::test]
async fn tenant_scoped_route_needs_a_tenant() {
    let server = TestServer::spawn().await;
    let token = server.token(None, &["employee"], &["payroll:read:payroll"]);

    let (status, _, body) = server.get("/api/v1/payroll", Some(&token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Tenant context required");
}

#[tokio::test]
async fn foreign_tenant_requires_membership() {
    let server = TestServer::spawn().await;
    let user = UserId::new();
    let foreign = TenantId::new();
    let token = server.token_for(user, Some(TenantId::new()), &["employee"], &["payroll:read:payroll"]);

    let request = || {
        server
            .client
            .get(server.url("/api/v1/payroll"))
            .bearer_auth(&token)
            .header("x-tenant-id", foreign.to_string())
    };

    let (status, _, body) = server.call(request()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["tenantId"], foreign.to_string());

    server.memberships.insert(TenantMembership {
        tenant_id: foreign,
        user_id: user,
        role: Role::new("accountant"),
        status: MembershipStatus::Active,
    });

    let (status, _, body) = server.call(request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["headers"]["x-tenant-id"], foreign.to_string());
    let context: Value = serde_json::from_str(body["headers"]["x-tenant-context"].as_str().unwrap()).unwrap();
    assert_eq!(context["userRole"], "accountant");
}

#[tokio::test]
async fn non_tenant_route_ignores_client_tenant_header() {
    let server = TestServer::spawn().await;
    let home = TenantId::new();
    let token = server.token(Some(home), &["user"], &["tenant:read:tenants"]);

    let (status, _, body) = server
        .call(
            server
                .client
                .get(server.url("/api/v1/tenants"))
                .bearer_auth(&token)
                .header("x-tenant-id", TenantId::new().to_string()),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "/tenants");
    assert_eq!(body["headers"]["x-tenant-id"], home.to_string());
    assert!(body["headers"]["x-tenant-context"].is_null());
}

#[tokio::test]
async fn backend_errors_pass_through_unchanged() {
    let server = TestServer::spawn().await;
    let token = server.token(Some(TenantId::new()), &["admin"], &[]);

    let (status, headers, body) = server.get("/api/v1/payroll/fail", Some(&token)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body, json!({ "error": "Validation failed", "fields": ["period"] }));
    assert_eq!(headers["x-gateway"], "Nexus-API-Gateway");
}

#[tokio::test]
async fn unreachable_backend_is_502() {
    let server = TestServer::spawn().await;
    let token = server.token(None, &["service"], &["integrations:manage:connectors"]);

    let (status, _, body) = server.get("/api/v1/integrations/quickbooks/sync", Some(&token)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "Service temporarily unavailable");
    assert!(!body["message"].as_str().unwrap().contains("127.0.0.1"));
}

#[tokio::test]
async fn unknown_route_is_404() {
    let server = TestServer::spawn().await;

    let (status, _, body) = server.get("/api/v1/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Not found");
    assert_eq!(body["message"], "Route GET /api/v1/nope not found");
}

#[tokio::test]
async fn auth_routes_are_public_and_strictly_limited() {
    let server = TestServer::spawn_with(&[("AUTH_RATE_LIMIT_MAX_REQUESTS", "2")]).await;
    let login = || {
        server
            .client
            .post(server.url("/api/v1/auth/login"))
            .json(&json!({ "email": "admin@nexus.lk", "password": "admin123" }))
    };

    for _ in 0..2 {
        let (status, _, body) = server.call(login()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["path"], "/auth/login");
        assert!(body["headers"]["x-user-id"].is_null());
    }

    let (status, headers, body) = server.call(login()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["retryAfter"].as_u64().unwrap() > 0);
    assert!(headers.contains_key(RETRY_AFTER));

    // The strict budget is separate from the default one.
    let (status, _, _) = server.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn rotating_forwarded_for_does_not_reset_the_auth_budget() {
    let server = TestServer::spawn_with(&[("AUTH_RATE_LIMIT_MAX_REQUESTS", "2")]).await;
    let login = |hop: &str| {
        server
            .client
            .post(server.url("/api/v1/auth/login"))
            .header("x-forwarded-for", hop)
            .json(&json!({ "email": "admin@nexus.lk", "password": "admin123" }))
    };

    assert_eq!(server.call(login("198.51.100.1")).await.0, StatusCode::OK);
    assert_eq!(server.call(login("198.51.100.2")).await.0, StatusCode::OK);
    let (status, _, _) = server.call(login("198.51.100.3")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn default_budget_covers_every_route() {
    let server = TestServer::spawn_with(&[("RATE_LIMIT_MAX_REQUESTS", "3")]).await;
    for _ in 0..3 {
        assert_eq!(server.get("/", None).await.0, StatusCode::OK);
    }
    let (status, _, body) = server.get("/api/v1/nope", None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "Too many requests from this IP, please try again later.");
}

#[tokio::test]
async fn banner_and_health() {
    let server = TestServer::spawn().await;

    let (status, _, body) = server.get("/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "Nexus API Gateway");
    assert_eq!(body["endpoints"]["payroll"], "/api/v1/payroll/*");

    let (status, _, body) = server.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["environment"], "test");
    assert_eq!(body["services"]["cache"], "up");
}

#[tokio::test]
async fn debug_route_exists_only_in_development() {
    let server = TestServer::spawn().await;
    let (status, _, _) = server.get("/internal/debug/proxy-tenants", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let server = TestServer::spawn_with(&[("APP_ENV", "development")]).await;
    let (status, _, body) = server.get("/internal/debug/proxy-tenants", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["method"], "GET");
    assert_eq!(body["path"], "/tenants");
    assert_eq!(body["headers"]["x-user-permissions"], "[\"tenant:read:tenants\"]");
    assert_eq!(body["headers"]["x-user-id"], "service:gateway-debug");

    let bearer = body["headers"]["authorization"].as_str().unwrap();
    let claims = nexus_auth::TokenVerifier::verify(&server.tokens, bearer.trim_start_matches("Bearer ")).unwrap();
    assert_eq!(claims.exp - claims.iat, 300);
}
