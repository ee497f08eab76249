use std::sync::Arc;

use axum::extract::Extension;
use axum::http::{Method, StatusCode, Uri};
use axum::{Json, response::IntoResponse};
use chrono::Utc;
use serde_json::json;

use nexus_api::ApiError;

use crate::services::IdentityServices;

/// GET /health - 503 when the database is unreachable or a configured cache is down
pub async fn health(Extension(services): Extension<Arc<IdentityServices>>) -> impl IntoResponse {
    let database = services.store.ping().await.is_ok();
    let cache = services.cache_status().await;
    let healthy = database && cache != "down";

    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    let body = json!({
        "success": true,
        "data": {
            "status": if healthy { "healthy" } else { "unhealthy" },
            "timestamp": Utc::now(),
            "service": "identity-service",
            "version": env!("CARGO_PKG_VERSION"),
            "environment": services.environment.as_str(),
            "checks": {
                "database": database,
                "cache": cache,
            },
        },
    });
    (status, Json(body))
}

pub async fn not_found(method: Method, uri: Uri) -> ApiError {
    ApiError::RouteNotFound {
        method,
        path: uri.path().to_string(),
    }
}
