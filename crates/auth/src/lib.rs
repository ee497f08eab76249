//! `nexus-auth` - pure authentication/authorization boundary (zero-trust).
//!
//! Permissions, roles, access profiles, token issuance/verification and the
//! authorization decision itself. This crate is intentionally decoupled from
//! HTTP and storage: callers hand it data, it hands back decisions.

pub mod authorize;
pub mod claims;
pub mod password;
pub mod permissions;
pub mod principal;
pub mod profile;
pub mod roles;
pub mod token;

pub use authorize::{AuthzError, Grant, authorize, require_role};
pub use claims::{TokenClaims, TokenValidationError, validate_claims};
pub use password::{PasswordError, PasswordHasher};
pub use permissions::{Permission, PermissionRecord};
pub use principal::{MembershipStatus, Principal, PrincipalId, TenantMembership};
pub use profile::AccessProfile;
pub use roles::Role;
pub use token::{
    IssuedToken, ServiceClient, TokenConfig, TokenError, TokenKind, TokenService, TokenSubject,
    TokenTtls, TokenVerifier,
};
