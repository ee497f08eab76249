//! Black-box tests: the real identity router on an ephemeral port, driven over HTTP.

use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::{Value, json};

use nexus_auth::{PasswordHasher, PermissionRecord, TokenService};
use nexus_core::PermissionId;
use nexus_identity::seed::{ADMIN_EMAIL, ADMIN_PASSWORD, DEFAULT_TENANT_ID, seed_development};
use nexus_identity::{IdentityConfig, IdentityServices, build_app};
use nexus_infra::{
    Cache, CredentialStore, EnvSource, InMemoryCache, InMemoryCredentialStore, PermissionResolver,
};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
    store: Arc<InMemoryCredentialStore>,
    cache: Arc<InMemoryCache>,
    client: reqwest::Client,
}

impl TestServer {
    async fn spawn() -> Self {
        let config = IdentityConfig::from_env(&EnvSource::from_pairs([
            ("APP_ENV", "test"),
            ("SERVICE_CLIENTS", "quickbooks:qb-secret"),
        ]))
        .unwrap();

        let hasher = PasswordHasher::new(4);
        let store = Arc::new(InMemoryCredentialStore::new());
        seed_development(&store, &hasher).unwrap();
        let cache = Arc::new(InMemoryCache::new());

        let services = Arc::new(IdentityServices::new(
            store.clone(),
            cache.clone(),
            Arc::new(TokenService::new(config.token.clone())),
            hasher,
            config.permission_cache_ttl,
            config.environment,
        ));
        let app = build_app(services, &config);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            handle,
            store,
            cache,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(&self, path: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut req = self.client.post(self.url(path)).json(&body);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let res = req.send().await.unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn send(&self, method: reqwest::Method, path: &str, token: &str) -> (StatusCode, Value) {
        let res = self
            .client
            .request(method, self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn login(&self, email: &str, password: &str) -> (StatusCode, Value) {
        self.post("/auth/login", None, json!({ "email": email, "password": password }))
            .await
    }

    async fn admin_token(&self) -> String {
        let (status, body) = self.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["data"]["accessToken"].as_str().unwrap().to_string()
    }

    async fn cached(&self, user_id: &str) -> Option<String> {
        let key = PermissionResolver::cache_key(user_id.parse().unwrap());
        self.cache.get(&key).await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn permission_id(server: &TestServer, name: &str) -> PermissionId {
    let all: Vec<PermissionRecord> = server.store.list_permissions().await.unwrap();
    all.into_iter().find(|p| p.render().as_str() == name).unwrap().id
}

#[tokio::test]
async fn seeded_admin_login_returns_token_with_admin_role() {
    let server = TestServer::spawn().await;

    let (status, body) = server.login("ADMIN@nexus.lk", ADMIN_PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let user = &body["data"]["user"];
    assert!(user["roles"].as_array().unwrap().contains(&json!("admin")));
    assert!(!user["permissions"].as_array().unwrap().is_empty());
    assert!(user.get("passwordHash").is_none());

    let stored = server.store.find_user_by_email(ADMIN_EMAIL).await.unwrap().unwrap();
    assert!(stored.last_login_at.is_some());
}

#[tokio::test]
async fn bad_credentials_are_indistinguishable() {
    let server = TestServer::spawn().await;

    let (wrong_password, a) = server.login(ADMIN_EMAIL, "nope").await;
    let (unknown_user, b) = server.login("ghost@nexus.lk", "nope").await;
    assert_eq!(wrong_password, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_user, StatusCode::UNAUTHORIZED);
    assert_eq!(a, b);
    assert_eq!(a["error"], "Invalid credentials");

    let (missing, body) = server.post("/auth/login", None, json!({ "email": ADMIN_EMAIL })).await;
    assert_eq!(missing, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Email and password are required");
}

#[tokio::test]
async fn admin_provisions_user_and_assignment_invalidates_cache() {
    let server = TestServer::spawn().await;
    let admin = server.admin_token().await;
    let read_users = permission_id(&server, "identity:read:users").await;

    let (status, body) = server
        .post(
            "/roles",
            Some(&admin),
            json!({ "name": "auditor", "description": "Read-only", "permissionIds": [read_users.to_string()] }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let role_id = body["data"]["role"]["id"].as_str().unwrap().to_string();

    let (status, body) = server
        .post(
            "/users",
            Some(&admin),
            json!({ "email": "clerk@nexus.lk", "password": "secret1", "firstName": "Ada", "lastName": "Clerk" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let user_id = body["data"]["user"]["id"].as_str().unwrap().to_string();

    // Populate the cache before the assignment.
    let (status, _) = server.login("clerk@nexus.lk", "secret1").await;
    assert_eq!(status, StatusCode::OK);
    assert!(server.cached(&user_id).await.is_some());

    let (status, body) = server
        .post(&format!("/users/{user_id}/roles"), Some(&admin), json!({ "roleId": role_id }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(server.cached(&user_id).await.is_none());

    let (status, body) = server.login("clerk@nexus.lk", "secret1").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["user"]["roles"].as_array().unwrap().contains(&json!("auditor")));
    let cached = server.cached(&user_id).await.unwrap();
    assert!(cached.contains("auditor"));

    let (status, body) = server
        .post(&format!("/users/{user_id}/roles"), Some(&admin), json!({ "roleId": role_id }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Role already assigned to user");
}

#[tokio::test]
async fn role_in_use_cannot_be_deleted() {
    let server = TestServer::spawn().await;
    let admin = server.admin_token().await;

    let (_, body) = server.post("/roles", Some(&admin), json!({ "name": "temp" })).await;
    let role_id = body["data"]["role"]["id"].as_str().unwrap().to_string();
    let (_, body) = server
        .post(
            "/users",
            Some(&admin),
            json!({ "email": "t@nexus.lk", "password": "secret1", "firstName": "T", "lastName": "T", "roleId": role_id }),
        )
        .await;
    let user_id = body["data"]["user"]["id"].as_str().unwrap().to_string();

    let (status, body) = server.send(reqwest::Method::DELETE, &format!("/roles/{role_id}"), &admin).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Cannot delete role that is assigned to users");

    server.login("t@nexus.lk", "secret1").await;
    assert!(server.cached(&user_id).await.is_some());
    let (status, _) = server
        .send(reqwest::Method::DELETE, &format!("/users/{user_id}/roles/{role_id}"), &admin)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(server.cached(&user_id).await.is_none());

    let (status, _) = server.send(reqwest::Method::DELETE, &format!("/roles/{role_id}"), &admin).await;
    assert_eq!(status, StatusCode::OK);

    server.login("t@nexus.lk", "secret1").await;
    assert!(server.cached(&user_id).await.is_some());
    let (status, _) = server.send(reqwest::Method::DELETE, &format!("/users/{user_id}"), &admin).await;
    assert_eq!(status, StatusCode::OK);
    assert!(server.cached(&user_id).await.is_none());
}

#[tokio::test]
async fn role_permission_change_invalidates_every_holder() {
    let server = TestServer::spawn().await;
    let admin = server.admin_token().await;
    let read_users = permission_id(&server, "identity:read:users").await;
    let manage_roles = permission_id(&server, "identity:manage:roles").await;

    let (_, body) = server
        .post(
            "/roles",
            Some(&admin),
            json!({ "name": "auditor", "permissionIds": [read_users.to_string()] }),
        )
        .await;
    let role_id = body["data"]["role"]["id"].as_str().unwrap().to_string();

    let mut holders = Vec::new();
    for email in ["h1@nexus.lk", "h2@nexus.lk"] {
        let (status, body) = server
            .post(
                "/users",
                Some(&admin),
                json!({ "email": email, "password": "secret1", "firstName": "H", "lastName": "H", "roleId": role_id }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let user_id = body["data"]["user"]["id"].as_str().unwrap().to_string();

        let (_, body) = server.login(email, "secret1").await;
        assert_eq!(body["data"]["user"]["permissions"], json!(["identity:read:users"]));
        assert!(server.cached(&user_id).await.is_some());
        holders.push((email, user_id));
    }

    let res = server
        .client
        .put(server.url(&format!("/roles/{role_id}")))
        .bearer_auth(&admin)
        .json(&json!({ "permissionIds": [manage_roles.to_string()] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    for (email, user_id) in &holders {
        assert!(server.cached(user_id).await.is_none());

        let (status, body) = server.login(email, "secret1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["user"]["permissions"], json!(["identity:manage:roles"]));
    }
}

#[tokio::test]
async fn duplicate_role_name_conflicts() {
    let server = TestServer::spawn().await;
    let admin = server.admin_token().await;

    let (status, body) = server.post("/roles", Some(&admin), json!({ "name": "manager" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Role with this name already exists");
}

#[tokio::test]
async fn missing_permission_is_403_with_required_set() {
    let server = TestServer::spawn().await;
    let admin = server.admin_token().await;

    server
        .post(
            "/users",
            Some(&admin),
            json!({ "email": "plain@nexus.lk", "password": "secret1", "firstName": "P", "lastName": "L" }),
        )
        .await;
    let (_, body) = server.login("plain@nexus.lk", "secret1").await;
    let token = body["data"]["accessToken"].as_str().unwrap().to_string();

    let (status, body) = server.send(reqwest::Method::GET, "/roles", &token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["required"], json!(["identity:manage:roles"]));

    let (status, _) = server.send(reqwest::Method::GET, "/users", &token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = server.send(reqwest::Method::GET, "/roles", "garbage").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid or expired token");

    let res = server.client.get(server.url("/roles")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "Access token required");
}

#[tokio::test]
async fn refresh_picks_up_new_grants_and_rejects_deactivated_users() {
    let server = TestServer::spawn().await;
    let admin = server.admin_token().await;

    let (_, body) = server
        .post(
            "/users",
            Some(&admin),
            json!({ "email": "r@nexus.lk", "password": "secret1", "firstName": "R", "lastName": "R" }),
        )
        .await;
    let user_id = body["data"]["user"]["id"].as_str().unwrap().to_string();
    let (_, body) = server.login("r@nexus.lk", "secret1").await;
    let token = body["data"]["accessToken"].as_str().unwrap().to_string();

    let manager = server
        .store
        .find_role_by_name(DEFAULT_TENANT_ID, "manager")
        .await
        .unwrap()
        .unwrap();
    server
        .post(&format!("/users/{user_id}/roles"), Some(&admin), json!({ "roleId": manager.id.to_string() }))
        .await;

    let (status, body) = server.post("/auth/refresh", None, json!({ "refreshToken": token })).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["data"]["user"]["roles"].as_array().unwrap().contains(&json!("manager")));

    let res = server
        .client
        .put(server.url(&format!("/users/{user_id}")))
        .bearer_auth(&admin)
        .json(&json!({ "isActive": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let (status, _) = server.post("/auth/refresh", None, json!({ "refreshToken": token })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, body) = server.send(reqwest::Method::GET, "/auth/profile", &token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "User not found or inactive");
}

#[tokio::test]
async fn service_token_exchange() {
    let server = TestServer::spawn().await;

    let (status, body) = server
        .post("/auth/service-token", None, json!({ "clientId": "quickbooks", "clientSecret": "qb-secret" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["expiresIn"], 3600);
    let token = body["data"]["accessToken"].as_str().unwrap().to_string();

    let (status, body) = server.send(reqwest::Method::GET, "/auth/profile", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["id"], "service:quickbooks");
    assert_eq!(body["data"]["user"]["tenantId"], Value::Null);
    assert_eq!(body["data"]["user"]["permissions"], json!(["integrations:manage:connectors"]));

    let (status, body) = server
        .post("/auth/service-token", None, json!({ "clientId": "quickbooks", "clientSecret": "wrong" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid credentials");

    let (status, _) = server.post("/auth/service-token", None, json!({ "clientId": "quickbooks" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn register_validates_and_rejects_duplicates() {
    let server = TestServer::spawn().await;
    let tenant = DEFAULT_TENANT_ID.to_string();

    let (status, body) = server
        .post(
            "/auth/register",
            None,
            json!({ "email": "bad", "password": "secret1", "firstName": "A", "lastName": "B", "tenantId": tenant }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid email format");

    let (status, _) = server
        .post(
            "/auth/register",
            None,
            json!({ "email": "new@nexus.lk", "password": "123", "firstName": "A", "lastName": "B", "tenantId": tenant }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server
        .post(
            "/auth/register",
            None,
            json!({ "email": "new@nexus.lk", "password": "secret1", "firstName": "A", "lastName": "B", "tenantId": tenant }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = server
        .post(
            "/auth/register",
            None,
            json!({ "email": "NEW@nexus.lk", "password": "secret1", "firstName": "A", "lastName": "B", "tenantId": tenant }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "User with this email already exists");
}

#[tokio::test]
async fn admin_cannot_delete_self_and_unknown_routes_are_404() {
    let server = TestServer::spawn().await;
    let admin = server.admin_token().await;

    let admin_id = nexus_identity::seed::ADMIN_USER_ID.to_string();
    let (status, body) = server.send(reqwest::Method::DELETE, &format!("/users/{admin_id}"), &admin).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Cannot delete your own account");

    let (status, body) = server.send(reqwest::Method::GET, "/nowhere", &admin).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Not found");
}

#[tokio::test]
async fn health_reports_checks() {
    let server = TestServer::spawn().await;
    let res = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["checks"]["database"], true);
    assert_eq!(body["data"]["checks"]["cache"], "up");
}
