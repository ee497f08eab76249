use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, warn};

use nexus_auth::{Principal, TokenVerifier};

use crate::errors::ApiError;

#[derive(Clone)]
pub struct AuthState {
    verifier: Arc<dyn TokenVerifier>,
    /// Cookie carrying service tokens for connector callbacks.
    cookie_name: Option<Arc<str>>,
}

impl AuthState {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            verifier,
            cookie_name: None,
        }
    }

    pub fn with_cookie(mut self, name: impl Into<Arc<str>>) -> Self {
        self.cookie_name = Some(name.into());
        self
    }

    fn principal(&self, token: &str) -> Result<Principal, ApiError> {
        self.verifier.verify(token).map(Principal::from).map_err(|e| {
            warn!(reason = e.reason(), error = %e, "token verification failed");
            ApiError::InvalidOrExpiredToken
        })
    }
}

/// Require a valid token and attach the [`Principal`] built from its claims.
pub async fn authenticate(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(req.headers(), state.cookie_name.as_deref())
        .ok_or(ApiError::AccessTokenRequired)?;
    let principal = state.principal(&token)?;

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

/// Attach a principal when a valid token is present; never rejects.
pub async fn optional_auth(State(state): State<AuthState>, mut req: Request, next: Next) -> Response {
    if let Some(token) = extract_token(req.headers(), state.cookie_name.as_deref()) {
        match state.principal(&token) {
            Ok(principal) => {
                req.extensions_mut().insert(principal);
            }
            Err(_) => debug!("continuing without identity"),
        }
    }
    next.run(req).await
}

/// Bearer token from `Authorization`, else the named cookie.
pub fn extract_token(headers: &HeaderMap, cookie_name: Option<&str>) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    let name = cookie_name?;
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, v)| *k == name && !v.is_empty())
        .map(|(_, v)| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{HeaderValue, StatusCode};
    use axum::routing::get;
    use axum::{Extension, Router, middleware};
    use tower::ServiceExt;

    use nexus_auth::{TokenConfig, TokenKind, TokenService, TokenSubject, PrincipalId};
    use nexus_core::{TenantId, UserId};

    const SECRET: &str = "middleware-test-secret-0123456789abcdef";

    fn tokens() -> Arc<TokenService> {
        Arc::new(TokenService::new(TokenConfig::new(SECRET)))
    }

    fn subject() -> TokenSubject {
        TokenSubject {
            id: PrincipalId::User(UserId::new()),
            tenant_id: Some(TenantId::new()),
            email: "clerk@nexus.lk".into(),
            roles: vec![],
            permissions: vec![],
        }
    }

    fn app(tokens: Arc<TokenService>) -> Router {
        let state = AuthState::new(tokens).with_cookie("connector_token");
        Router::new()
            .route(
                "/me",
                get(|Extension(p): Extension<Principal>| async move { p.email }),
            )
            .route_layer(middleware::from_fn_with_state(state, authenticate))
    }

    async fn status(app: Router, req: axum::http::Request<Body>) -> StatusCode {
        app.oneshot(req).await.unwrap().status()
    }

    #[tokio::test]
    async fn missing_token_is_401() {
        let req = axum::http::Request::get("/me").body(Body::empty()).unwrap();
        assert_eq!(status(app(tokens()), req).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn garbage_token_is_401() {
        let req = axum::http::Request::get("/me")
            .header(header::AUTHORIZATION, "Bearer not-a-jwt")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status(app(tokens()), req).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn expired_token_is_401() {
        let tokens = tokens();
        let old = tokens.issue_at(subject(), TokenKind::User, 1_000).unwrap();
        let req = axum::http::Request::get("/me")
            .header(header::AUTHORIZATION, format!("Bearer {}", old.token))
            .body(Body::empty())
            .unwrap();
        assert_eq!(status(app(tokens), req).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn valid_bearer_attaches_principal() {
        let tokens = tokens();
        let issued = tokens.issue(subject(), TokenKind::User).unwrap();
        let req = axum::http::Request::get("/me")
            .header(header::AUTHORIZATION, format!("Bearer {}", issued.token))
            .body(Body::empty())
            .unwrap();
        assert_eq!(status(app(tokens), req).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn cookie_is_accepted_when_configured() {
        let tokens = tokens();
        let issued = tokens.issue(subject(), TokenKind::Service).unwrap();
        let req = axum::http::Request::get("/me")
            .header(header::COOKIE, format!("theme=dark; connector_token={}", issued.token))
            .body(Body::empty())
            .unwrap();
        assert_eq!(status(app(tokens), req).await, StatusCode::OK);
    }

    #[test]
    fn bearer_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(header::COOKIE, HeaderValue::from_static("connector_token=xyz"));
        assert_eq!(extract_token(&headers, Some("connector_token")).as_deref(), Some("abc"));

        headers.remove(header::AUTHORIZATION);
        assert_eq!(extract_token(&headers, None), None);
    }

    #[tokio::test]
    async fn optional_auth_passes_through_without_token() {
        let state = AuthState::new(tokens());
        let app = Router::new()
            .route(
                "/",
                get(|p: Option<Extension<Principal>>| async move { p.is_some().to_string() }),
            )
            .route_layer(middleware::from_fn_with_state(state, optional_auth));

        let req = axum::http::Request::get("/")
            .header(header::AUTHORIZATION, "Bearer broken")
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"false");
    }
}
