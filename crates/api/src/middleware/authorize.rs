use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, warn};

use nexus_auth::{Grant, Permission, Principal, Role, authorize};

use crate::errors::ApiError;

/// Permissions a route requires: a base set plus extras per HTTP method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionRequirement {
    always: Vec<Permission>,
    per_method: Vec<(Method, Vec<Permission>)>,
}

impl PermissionRequirement {
    pub fn all<I, P>(permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Permission>,
    {
        Self {
            always: permissions.into_iter().map(Into::into).collect(),
            per_method: Vec::new(),
        }
    }

    /// Add `permissions` for requests using `method`.
    pub fn on<I, P>(mut self, method: Method, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Permission>,
    {
        self.per_method
            .push((method, permissions.into_iter().map(Into::into).collect()));
        self
    }

    /// The full requirement for one request.
    pub fn for_method(&self, method: &Method) -> Vec<Permission> {
        let mut required = self.always.clone();
        for (m, extra) in &self.per_method {
            if m == method {
                for p in extra {
                    if !required.contains(p) {
                        required.push(p.clone());
                    }
                }
            }
        }
        required
    }

    pub fn is_empty(&self) -> bool {
        self.always.is_empty() && self.per_method.is_empty()
    }
}

fn principal_of(req: &Request) -> Result<&Principal, ApiError> {
    req.extensions()
        .get::<Principal>()
        .ok_or(ApiError::AccessTokenRequired)
}

/// Enforce a [`PermissionRequirement`]; `admin` bypasses it.
pub async fn require_permissions(
    State(requirement): State<Arc<PermissionRequirement>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let required = requirement.for_method(req.method());
    let principal = principal_of(&req)?;

    match authorize(principal, &required) {
        Ok(Grant::AdminBypass) => {
            debug!(principal = %principal.id, path = %req.uri().path(), "admin bypass");
        }
        Ok(Grant::PermissionCheck(_)) => {}
        Err(err) => {
            warn!(
                principal = %principal.id,
                path = %req.uri().path(),
                required = ?required,
                held = principal.permissions.len(),
                "insufficient permissions"
            );
            return Err(err.into());
        }
    }

    Ok(next.run(req).await)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRequirement(pub Role);

/// Require a role. Unlike permissions, `admin` does not stand in for other roles.
pub async fn require_role(
    State(requirement): State<Arc<RoleRequirement>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = principal_of(&req)?;
    if let Err(err) = nexus_auth::require_role(principal, &requirement.0) {
        warn!(principal = %principal.id, role = %requirement.0, "missing role");
        return Err(err.into());
    }
    Ok(next.run(req).await)
}
