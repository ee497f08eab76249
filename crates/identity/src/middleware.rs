use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use nexus_api::ApiError;
use nexus_auth::Principal;

use crate::services::IdentityServices;

/// Reject tokens whose user was deleted or deactivated after issuance.
///
/// Runs after `authenticate`. Service principals have no user row and pass.
pub async fn require_active_user(
    State(services): State<Arc<IdentityServices>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user_id = req
        .extensions()
        .get::<Principal>()
        .ok_or(ApiError::AccessTokenRequired)?
        .id
        .user_id();

    if let Some(user_id) = user_id {
        if services.active_user(user_id).await?.is_none() {
            warn!(user_id = %user_id, "token presented for missing or inactive user");
            return Err(ApiError::InactiveUser);
        }
    }

    Ok(next.run(req).await)
}
