use std::time::Instant;

use axum::Json;
use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use uuid::Uuid;

use crate::context::RequestId;
use crate::errors::InternalErrorDetail;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Accept or mint an `x-request-id`, expose it to handlers and echo it back.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .unwrap_or_else(Uuid::new_v4);

    let value = HeaderValue::from_str(&id.to_string()).ok();
    if let Some(v) = &value {
        req.headers_mut().insert(X_REQUEST_ID, v.clone());
    }
    req.extensions_mut().insert(RequestId(id));

    let mut res = next.run(req).await;
    if let Some(v) = value {
        res.headers_mut().insert(X_REQUEST_ID, v);
    }
    res
}

pub async fn log_requests(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let request_id = req.extensions().get::<RequestId>().map(|r| r.0.to_string());

    let res = next.run(req).await;

    let status = res.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let request_id = request_id.unwrap_or_default();

    if status.is_server_error() {
        tracing::error!(%method, %uri, status = status.as_u16(), elapsed_ms, request_id = %request_id, "request completed");
    } else if status.is_client_error() {
        tracing::warn!(%method, %uri, status = status.as_u16(), elapsed_ms, request_id = %request_id, "request completed");
    } else {
        tracing::info!(%method, %uri, status = status.as_u16(), elapsed_ms, request_id = %request_id, "request completed");
    }

    res
}

/// Development only: put the internal error detail back into 500 bodies.
pub async fn expose_internal_errors(req: Request, next: Next) -> Response {
    let res = next.run(req).await;
    match res.extensions().get::<InternalErrorDetail>() {
        Some(InternalErrorDetail(detail)) => {
            let body = json!({
                "success": false,
                "error": "Internal server error",
                "message": detail,
            });
            (res.status(), Json(body)).into_response()
        }
        None => res,
    }
}
