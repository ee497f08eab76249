use serde::{Deserialize, Serialize};
use thiserror::Error;

use nexus_core::TenantId;

use crate::{Permission, PrincipalId, Role};

/// Signed token payload.
///
/// Key names are part of the wire contract with every downstream service:
/// `{userId, tenantId, email, roles, permissions, iat, exp}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    pub user_id: PrincipalId,

    /// `null` for service principals.
    pub tenant_id: Option<TenantId>,

    pub email: String,

    #[serde(default)]
    pub roles: Vec<Role>,

    #[serde(default)]
    pub permissions: Vec<Permission>,

    /// Issued-at, seconds since the epoch.
    pub iat: i64,

    /// Expiry, seconds since the epoch.
    pub exp: i64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (iat is in the future)")]
    NotYetValid,

    #[error("invalid token time window (exp <= iat)")]
    InvalidTimeWindow,
}

/// Deterministically validate the time window of already-decoded claims.
///
/// `leeway` tolerates clock skew between the issuing and verifying hosts.
pub fn validate_claims(claims: &TokenClaims, now: i64, leeway: i64) -> Result<(), TokenValidationError> {
    if claims.exp <= claims.iat {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now + leeway < claims.iat {
        return Err(TokenValidationError::NotYetValid);
    }
    if now - leeway >= claims.exp {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}
