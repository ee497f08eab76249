//! The gateway's route table: which prefix goes to which backend, and what a
//! caller needs to get through.

use axum::http::Method;

use nexus_api::middleware::PermissionRequirement;
use nexus_auth::Permission;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Backend {
    Identity,
    Tenant,
    User,
    Payroll,
    Connector,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Tenant => "tenant",
            Self::User => "user",
            Self::Payroll => "payroll",
            Self::Connector => "connector",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// Identity is attached when a valid token is present; never rejects.
    Optional,
    Required,
}

#[derive(Debug, Clone)]
pub struct ServiceRoute {
    pub prefix: &'static str,
    pub backend: Backend,
    /// Replaces `prefix` in the forwarded path.
    pub rewrite: &'static str,
    pub auth: AuthMode,
    pub tenant_scoped: bool,
    pub permissions: PermissionRequirement,
}

impl ServiceRoute {
    /// Backend path for an incoming path under this prefix.
    pub fn rewrite_path(&self, path: &str) -> String {
        let rest = path.strip_prefix(self.prefix).unwrap_or(path);
        format!("{}{}", self.rewrite, rest)
    }
}

/// Paths that additionally draw from the strict authentication budget.
pub const STRICT_PATHS: &[&str] = &[
    "/api/v1/auth/login",
    "/api/v1/auth/register",
    "/api/v1/auth/service-token",
];

pub fn is_strict(path: &str) -> bool {
    STRICT_PATHS.contains(&path.trim_end_matches('/'))
}

/// Standard CRUD requirement for `module:*:resource`: read always, plus the
/// verb-specific permission for writes. PUT and PATCH both count as update.
fn crud(module: &str, resource: &str) -> PermissionRequirement {
    let perm = |action: &str| Permission::from_parts(module, action, resource);
    PermissionRequirement::all([perm("read")])
        .on(Method::POST, [perm("create")])
        .on(Method::PUT, [perm("update")])
        .on(Method::PATCH, [perm("update")])
        .on(Method::DELETE, [perm("delete")])
}

pub fn route_table() -> Vec<ServiceRoute> {
    vec![
        ServiceRoute {
            prefix: "/api/v1/auth",
            backend: Backend::Identity,
            rewrite: "/auth",
            auth: AuthMode::Optional,
            tenant_scoped: false,
            permissions: PermissionRequirement::default(),
        },
        ServiceRoute {
            prefix: "/api/v1/tenants",
            backend: Backend::Tenant,
            rewrite: "/tenants",
            auth: AuthMode::Required,
            tenant_scoped: false,
            permissions: crud("tenant", "tenants"),
        },
        ServiceRoute {
            prefix: "/api/v1/users",
            backend: Backend::User,
            rewrite: "/users",
            auth: AuthMode::Required,
            tenant_scoped: true,
            permissions: crud("identity", "users"),
        },
        ServiceRoute {
            prefix: "/api/v1/roles",
            backend: Backend::Identity,
            rewrite: "/roles",
            auth: AuthMode::Required,
            tenant_scoped: true,
            permissions: PermissionRequirement::all(["identity:manage:roles"]),
        },
        ServiceRoute {
            prefix: "/api/v1/payroll",
            backend: Backend::Payroll,
            rewrite: "/payroll",
            auth: AuthMode::Required,
            tenant_scoped: true,
            permissions: crud("payroll", "payroll"),
        },
        ServiceRoute {
            prefix: "/api/v1/integrations",
            backend: Backend::Connector,
            rewrite: "/integrations",
            auth: AuthMode::Required,
            tenant_scoped: false,
            permissions: PermissionRequirement::all([nexus_auth::token::SERVICE_PERMISSION]),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(prefix: &str) -> ServiceRoute {
        route_table().into_iter().find(|r| r.prefix == prefix).unwrap()
    }

    #[test]
    fn prefixes_are_rewritten() {
        let auth = route("/api/v1/auth");
        assert_eq!(auth.rewrite_path("/api/v1/auth/login"), "/auth/login");

        let payroll = route("/api/v1/payroll");
        assert_eq!(payroll.rewrite_path("/api/v1/payroll"), "/payroll");
        assert_eq!(payroll.rewrite_path("/api/v1/payroll/runs/7"), "/payroll/runs/7");
    }

    #[test]
    fn put_and_patch_both_need_update() {
        let users = route("/api/v1/users").permissions;
        let update = Permission::new("identity:update:users");
        assert!(users.for_method(&Method::PUT).contains(&update));
        assert!(users.for_method(&Method::PATCH).contains(&update));
        assert_eq!(users.for_method(&Method::GET), vec![Permission::new("identity:read:users")]);
    }

    #[test]
    fn only_auth_is_public() {
        for r in route_table() {
            assert_eq!(r.auth == AuthMode::Optional, r.prefix == "/api/v1/auth", "{}", r.prefix);
        }
    }

    #[test]
    fn strict_paths() {
        assert!(is_strict("/api/v1/auth/login"));
        assert!(is_strict("/api/v1/auth/service-token/"));
        assert!(!is_strict("/api/v1/auth/profile"));
    }
}
