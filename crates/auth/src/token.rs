//! Token issuance and verification (HS256, shared secret).
//!
//! Tokens are stateless: once issued, the embedded roles and permissions are
//! trusted until `exp`. Refresh is the only way to pick up newer grants.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::warn;

use nexus_core::TenantId;

use crate::claims::{TokenValidationError, validate_claims};
use crate::{Permission, PrincipalId, Role, TokenClaims};

/// Permission granted to every service principal.
pub const SERVICE_PERMISSION: &str = "integrations:manage:connectors";

/// Secrets that ship as local-development defaults and must never reach production.
pub const DEVELOPMENT_SECRETS: &[&str] = &[
    "nexus_jwt_secret_key_dev_only",
    "nexus_jwt_secret_key_2024",
    "changeme",
    "secret",
];

const MIN_PRODUCTION_SECRET_LEN: usize = 32;

/// True when `secret` is a known development default or too short for production use.
pub fn is_insecure_secret(secret: &str) -> bool {
    DEVELOPMENT_SECRETS.contains(&secret) || secret.len() < MIN_PRODUCTION_SECRET_LEN
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Bad signature, malformed structure, wrong algorithm, bad time window.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    ExpiredToken,

    #[error("invalid client credentials")]
    InvalidClientCredentials,

    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl TokenError {
    /// Short label for logs; clients never see the distinction.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidToken(_) => "invalid",
            Self::ExpiredToken => "expired",
            Self::InvalidClientCredentials => "invalid_client",
            Self::Signing(_) => "signing",
        }
    }
}

/// Which lifetime a token gets.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TokenKind {
    User,
    Service,
    /// Short-lived tokens minted by the gateway for its own internal calls.
    Debug,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TokenTtls {
    pub user: Duration,
    pub service: Duration,
    pub debug: Duration,
}

impl Default for TokenTtls {
    fn default() -> Self {
        Self {
            user: Duration::from_secs(24 * 60 * 60),
            service: Duration::from_secs(60 * 60),
            debug: Duration::from_secs(5 * 60),
        }
    }
}

impl TokenTtls {
    pub fn for_kind(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::User => self.user,
            TokenKind::Service => self.service,
            TokenKind::Debug => self.debug,
        }
    }
}

/// One allow-listed `(client id, secret)` pair for the client-credential exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceClient {
    pub client_id: String,
    secret: String,
}

impl core::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("client_id", &self.client_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl ServiceClient {
    pub fn new(client_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            secret: secret.into(),
        }
    }

    /// Parse `id:secret,id:secret`. Malformed entries are skipped with a warning.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .filter_map(|entry| match entry.split_once(':') {
                Some((id, secret)) if !id.is_empty() && !secret.is_empty() => {
                    Some(Self::new(id.trim(), secret.trim()))
                }
                _ => {
                    warn!("ignoring malformed service client entry");
                    None
                }
            })
            .collect()
    }

    fn matches(&self, client_id: &str, secret: &str) -> bool {
        self.client_id == client_id && bool::from(self.secret.as_bytes().ct_eq(secret.as_bytes()))
    }
}

#[derive(Clone)]
pub struct TokenConfig {
    pub secret: String,
    pub ttls: TokenTtls,
    pub service_clients: Vec<ServiceClient>,
    /// Clock-skew tolerance, in seconds.
    pub leeway_secs: u64,
}

impl TokenConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            ttls: TokenTtls::default(),
            service_clients: Vec::new(),
            leeway_secs: 0,
        }
    }
}

impl core::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"<redacted>")
            .field("ttls", &self.ttls)
            .field("service_clients", &self.service_clients)
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

/// Who a token is being issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSubject {
    pub id: PrincipalId,
    pub tenant_id: Option<TenantId>,
    pub email: String,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub claims: TokenClaims,
}

impl IssuedToken {
    pub fn expires_in_secs(&self) -> i64 {
        self.claims.exp - self.claims.iat
    }
}

/// Verification seam used by the HTTP middleware.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<TokenClaims, TokenError>;
}

pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttls: TokenTtls,
    leeway: i64,
    service_clients: Vec<ServiceClient>,
}

impl TokenService {
    const ALGORITHM: Algorithm = Algorithm::HS256;

    pub fn new(config: TokenConfig) -> Self {
        let mut validation = Validation::new(Self::ALGORITHM);
        validation.leeway = config.leeway_secs;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            ttls: config.ttls,
            leeway: i64::try_from(config.leeway_secs).unwrap_or(i64::MAX),
            service_clients: config.service_clients,
        }
    }

    pub fn ttls(&self) -> TokenTtls {
        self.ttls
    }

    /// Sign a token for `subject` with the lifetime of `kind`.
    pub fn issue(&self, subject: TokenSubject, kind: TokenKind) -> Result<IssuedToken, TokenError> {
        self.issue_at(subject, kind, Utc::now().timestamp())
    }

    pub fn issue_at(
        &self,
        subject: TokenSubject,
        kind: TokenKind,
        now: i64,
    ) -> Result<IssuedToken, TokenError> {
        let ttl = i64::try_from(self.ttls.for_kind(kind).as_secs()).unwrap_or(i64::MAX);
        let claims = TokenClaims {
            user_id: subject.id,
            tenant_id: subject.tenant_id,
            email: subject.email,
            roles: subject.roles,
            permissions: subject.permissions,
            iat: now,
            exp: now.saturating_add(ttl),
        };
        let token = jsonwebtoken::encode(&Header::new(Self::ALGORITHM), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        Ok(IssuedToken { token, claims })
    }

    /// Exchange client credentials for a service token.
    ///
    /// Service principals always get the `service` role and the single
    /// connector permission; nothing is configurable per client.
    pub fn issue_service_token(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<IssuedToken, TokenError> {
        let client = self
            .service_clients
            .iter()
            .find(|c| c.matches(client_id, client_secret))
            .ok_or(TokenError::InvalidClientCredentials)?;

        let subject = TokenSubject {
            id: PrincipalId::Service(client.client_id.clone()),
            tenant_id: None,
            email: format!("{}@services.nexus.local", client.client_id),
            roles: vec![Role::SERVICE],
            permissions: vec![Permission::new(SERVICE_PERMISSION)],
        };
        self.issue(subject, TokenKind::Service)
    }

    pub fn verify_at(&self, token: &str, now: i64) -> Result<TokenClaims, TokenError> {
        let data = jsonwebtoken::decode::<TokenClaims>(token, &self.decoding, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::ExpiredToken,
                _ => TokenError::InvalidToken(e.to_string()),
            })?;

        validate_claims(&data.claims, now, self.leeway).map_err(|e| match e {
            TokenValidationError::Expired => TokenError::ExpiredToken,
            other => TokenError::InvalidToken(other.to_string()),
        })?;

        Ok(data.claims)
    }
}

impl TokenVerifier for TokenService {
    fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        self.verify_at(token, Utc::now().timestamp())
    }
}

impl core::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenService")
            .field("ttls", &self.ttls)
            .field("service_clients", &self.service_clients.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_core::UserId;

    const SECRET: &str = "test-secret-that-is-long-enough-for-hs256";

    fn service() -> TokenService {
        let mut config = TokenConfig::new(SECRET);
        config.service_clients = ServiceClient::parse_list("quickbooks:qb-secret, , broken ,payroll:p-secret");
        TokenService::new(config)
    }

    fn subject() -> TokenSubject {
        TokenSubject {
            id: PrincipalId::User(UserId::new()),
            tenant_id: Some(TenantId::new()),
            email: "admin@nexus.lk".into(),
            roles: vec![Role::ADMIN],
            permissions: vec![Permission::new("identity:read:users")],
        }
    }

    #[test]
    fn issued_user_token_verifies_with_24h_lifetime() {
        let svc = service();
        let issued = svc.issue(subject(), TokenKind::User).unwrap();
        assert_eq!(issued.expires_in_secs(), 86_400);

        let claims = svc.verify(&issued.token).unwrap();
        assert_eq!(claims, issued.claims);
    }

    #[test]
    fn expired_token_is_distinguished_from_invalid() {
        let svc = service();
        let long_ago = Utc::now().timestamp() - 10 * 86_400;
        let issued = svc.issue_at(subject(), TokenKind::User, long_ago).unwrap();
        assert_eq!(svc.verify(&issued.token), Err(TokenError::ExpiredToken));

        let other = TokenService::new(TokenConfig::new("a-completely-different-secret-value"));
        let fresh = other.issue(subject(), TokenKind::User).unwrap();
        assert!(matches!(svc.verify(&fresh.token), Err(TokenError::InvalidToken(_))));
        assert!(matches!(svc.verify("not.a.jwt"), Err(TokenError::InvalidToken(_))));
    }

    #[test]
    fn debug_tokens_live_five_minutes() {
        let issued = service().issue(subject(), TokenKind::Debug).unwrap();
        assert_eq!(issued.expires_in_secs(), 300);
    }

    #[test]
    fn service_token_has_fixed_role_and_permission() {
        let svc = service();
        let issued = svc.issue_service_token("quickbooks", "qb-secret").unwrap();
        assert_eq!(issued.expires_in_secs(), 3_600);
        assert_eq!(issued.claims.user_id, PrincipalId::Service("quickbooks".into()));
        assert_eq!(issued.claims.tenant_id, None);
        assert_eq!(issued.claims.email, "quickbooks@services.nexus.local");
        assert_eq!(issued.claims.roles, vec![Role::SERVICE]);
        assert_eq!(issued.claims.permissions, vec![Permission::new(SERVICE_PERMISSION)]);

        let json: serde_json::Value = serde_json::to_value(&issued.claims).unwrap();
        assert_eq!(json["userId"], "service:quickbooks");
        assert!(json["tenantId"].is_null());
    }

    #[test]
    fn service_token_rejects_wrong_secret_and_unknown_client() {
        let svc = service();
        assert_eq!(
            svc.issue_service_token("quickbooks", "p-secret"),
            Err(TokenError::InvalidClientCredentials)
        );
        assert_eq!(
            svc.issue_service_token("broken", ""),
            Err(TokenError::InvalidClientCredentials)
        );
        assert!(svc.issue_service_token("payroll", "p-secret").is_ok());
    }

    #[test]
    fn insecure_secret_detection() {
        assert!(is_insecure_secret("nexus_jwt_secret_key_dev_only"));
        assert!(is_insecure_secret("short"));
        assert!(!is_insecure_secret(SECRET));
    }
}
