use core::str::FromStr;

use serde::{Deserialize, Serialize};

use nexus_core::{DomainError, TenantId, UserId};

use crate::{Permission, Role, TokenClaims};

const SERVICE_PREFIX: &str = "service:";

/// Identity of an authenticated principal.
///
/// On the wire (the `userId` claim, `X-User-ID`) a human is a bare UUID and a
/// service is `service:<client id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PrincipalId {
    User(UserId),
    Service(String),
}

impl PrincipalId {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::User(id) => Some(*id),
            Self::Service(_) => None,
        }
    }

    pub fn is_service(&self) -> bool {
        matches!(self, Self::Service(_))
    }
}

impl core::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::User(id) => core::fmt::Display::fmt(id, f),
            Self::Service(client) => write!(f, "{SERVICE_PREFIX}{client}"),
        }
    }
}

impl FromStr for PrincipalId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix(SERVICE_PREFIX) {
            Some("") => Err(DomainError::invalid_id("PrincipalId: empty service client id")),
            Some(client) => Ok(Self::Service(client.to_string())),
            None => Ok(Self::User(s.parse()?)),
        }
    }
}

impl TryFrom<String> for PrincipalId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PrincipalId> for String {
    fn from(value: PrincipalId) -> Self {
        value.to_string()
    }
}

impl From<UserId> for PrincipalId {
    fn from(value: UserId) -> Self {
        Self::User(value)
    }
}

/// The authenticated caller, as attached to a request after token verification.
///
/// Everything here is a snapshot of the signed claims at issuance time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: PrincipalId,
    pub email: String,
    pub tenant_id: Option<TenantId>,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(Role::is_admin)
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }

    /// Role used in the home tenant when no membership record exists.
    pub fn home_role(&self) -> Role {
        if self.is_admin() {
            return Role::ADMIN;
        }
        self.roles.first().cloned().unwrap_or(Role::MEMBER)
    }
}

impl From<TokenClaims> for Principal {
    fn from(claims: TokenClaims) -> Self {
        Self {
            id: claims.user_id,
            email: claims.email,
            tenant_id: claims.tenant_id,
            roles: claims.roles,
            permissions: claims.permissions,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    Active,
    Inactive,
    Pending,
}

impl FromStr for MembershipStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "pending" => Ok(Self::Pending),
            other => Err(DomainError::validation(format!("unknown membership status '{other}'"))),
        }
    }
}

/// A user's membership in a tenant other than (or including) their home tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantMembership {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: Role,
    pub status: MembershipStatus,
}

impl TenantMembership {
    pub fn is_active(&self) -> bool {
        self.status == MembershipStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_principal_round_trips_through_string() {
        let id: PrincipalId = "service:quickbooks".parse().unwrap();
        assert_eq!(id, PrincipalId::Service("quickbooks".into()));
        assert_eq!(id.to_string(), "service:quickbooks");
        assert!(id.user_id().is_none());
    }

    #[test]
    fn user_principal_is_a_bare_uuid() {
        let user = UserId::new();
        let json = serde_json::to_string(&PrincipalId::User(user)).unwrap();
        assert_eq!(json, format!("\"{user}\""));
        let back: PrincipalId = serde_json::from_str(&json).unwrap();
        assert_eq!(back.user_id(), Some(user));
    }

    #[test]
    fn rejects_empty_service_and_garbage() {
        assert!("service:".parse::<PrincipalId>().is_err());
        assert!("nobody".parse::<PrincipalId>().is_err());
    }

    #[test]
    fn home_role_prefers_admin() {
        let principal = Principal {
            id: PrincipalId::User(UserId::new()),
            email: "a@b.c".into(),
            tenant_id: None,
            roles: vec![Role::new("manager"), Role::ADMIN],
            permissions: vec![],
        };
        assert_eq!(principal.home_role(), Role::ADMIN);

        let nobody = Principal { roles: vec![], ..principal };
        assert_eq!(nobody.home_role(), Role::MEMBER);
    }
}
