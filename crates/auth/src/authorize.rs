//! The authorization decision.
//!
//! The `admin` bypass lives here and nowhere else: middleware and handlers ask
//! [`authorize`] and act on the returned [`Grant`] or [`AuthzError`].

use std::collections::HashSet;

use thiserror::Error;

use crate::{Permission, Principal, Role};

/// How a permission requirement was satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    /// The principal holds `admin`; permission checks were skipped.
    AdminBypass,

    /// Every permission in the required set was present in the principal's grants.
    PermissionCheck(Vec<Permission>),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("missing permissions: {missing:?}")]
    MissingPermissions {
        /// The full requirement of the route, echoed back to the caller.
        required: Vec<Permission>,
        missing: Vec<Permission>,
    },

    #[error("missing role '{0}'")]
    MissingRole(Role),
}

/// Authorize `principal` against a route's required permission set.
///
/// - No IO
/// - No panics
/// - All of `required` must be held; an empty requirement always passes.
pub fn authorize(principal: &Principal, required: &[Permission]) -> Result<Grant, AuthzError> {
    if principal.is_admin() {
        return Ok(Grant::AdminBypass);
    }

    let held: HashSet<&str> = principal.permissions.iter().map(Permission::as_str).collect();
    let missing: Vec<Permission> = required
        .iter()
        .filter(|p| !held.contains(p.as_str()))
        .cloned()
        .collect();

    if missing.is_empty() {
        Ok(Grant::PermissionCheck(required.to_vec()))
    } else {
        Err(AuthzError::MissingPermissions {
            required: required.to_vec(),
            missing,
        })
    }
}

/// Require a specific role. There is no bypass for role checks.
pub fn require_role(principal: &Principal, role: &Role) -> Result<(), AuthzError> {
    if principal.has_role(role) {
        Ok(())
    } else {
        Err(AuthzError::MissingRole(role.clone()))
    }
}
