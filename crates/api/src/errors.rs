//! Error taxonomy shared by every HTTP surface.
//!
//! Bodies are `{"success": false, "error": <message>, ...}`. Internal errors
//! never carry their detail in the body; the detail rides along as a response
//! extension that only the development-mode middleware turns into output.

use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::error;

use nexus_auth::{AuthzError, Permission, Role, TokenError};
use nexus_core::{DomainError, TenantId};
use nexus_infra::StoreError;

pub type ApiResult<T> = Result<T, ApiError>;

pub const SERVICE_UNAVAILABLE_MESSAGE: &str =
    "The requested service is currently unavailable. Please try again later.";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Access token required")]
    AccessTokenRequired,

    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,

    /// The token is valid but its user was deleted or deactivated since issuance.
    #[error("User not found or inactive")]
    InactiveUser,

    #[error("Insufficient permissions")]
    InsufficientPermissions { required: Vec<Permission> },

    #[error("Insufficient permissions")]
    InsufficientRole { required: Role },

    #[error("Tenant context required")]
    TenantContextRequired,

    #[error("Access denied for this tenant")]
    TenantAccessDenied { tenant_id: TenantId },

    #[error("{0}")]
    Forbidden(String),

    #[error("Service temporarily unavailable")]
    ServiceUnavailable,

    #[error("Too many requests from this IP, please try again later.")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Not found")]
    RouteNotFound { method: Method, path: String },

    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials
            | Self::AccessTokenRequired
            | Self::InvalidOrExpiredToken
            | Self::InactiveUser => StatusCode::UNAUTHORIZED,
            Self::InsufficientPermissions { .. }
            | Self::InsufficientRole { .. }
            | Self::TenantAccessDenied { .. }
            | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::TenantContextRequired | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::ServiceUnavailable => StatusCode::BAD_GATEWAY,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) | Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Detail of a 500 response, for the development-only rewrite.
#[derive(Debug, Clone)]
pub struct InternalErrorDetail(pub String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = json!({
            "success": false,
            "error": self.to_string(),
        });

        match &self {
            Self::InsufficientPermissions { required } => body["required"] = json!(required),
            Self::InsufficientRole { required } => body["requiredRole"] = json!(required),
            Self::TenantAccessDenied { tenant_id } => body["tenantId"] = json!(tenant_id),
            Self::ServiceUnavailable => body["message"] = json!(SERVICE_UNAVAILABLE_MESSAGE),
            Self::RateLimitExceeded { retry_after_secs } => body["retryAfter"] = json!(retry_after_secs),
            Self::RouteNotFound { method, path } => {
                body["message"] = json!(format!("Route {method} {path} not found"))
            }
            _ => {}
        }

        let mut response = (status, Json(body)).into_response();

        match self {
            Self::RateLimitExceeded { retry_after_secs } => {
                if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
            }
            Self::Internal(detail) => {
                error!(detail = %detail, "internal error");
                response.extensions_mut().insert(InternalErrorDetail(detail));
            }
            _ => {}
        }

        response
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(capitalize(&format!("{what} not found"))),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::RoleInUse { .. } => {
                Self::Validation("Cannot delete role that is assigned to users".to_string())
            }
            StoreError::InvalidReference(msg) => Self::Validation(msg),
            StoreError::Backend(msg) => Self::Internal(msg),
        }
    }
}

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::MissingPermissions { required, .. } => Self::InsufficientPermissions { required },
            AuthzError::MissingRole(required) => Self::InsufficientRole { required },
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::InvalidToken(_) | TokenError::ExpiredToken => Self::InvalidOrExpiredToken,
            TokenError::InvalidClientCredentials => Self::InvalidCredentials,
            TokenError::Signing(detail) => Self::Internal(detail),
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self::Validation(err.to_string())
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `200 {"success": true, "data": ...}`
pub fn ok<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

/// `201 {"success": true, "data": ...}`
pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<Value>) {
    (StatusCode::CREATED, ok(data))
}

/// `200 {"success": true, "data": {"message": ...}}`
pub fn ok_message(message: &str) -> Json<Value> {
    ok(json!({ "message": message }))
}
