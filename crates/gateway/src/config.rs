use std::time::Duration;

use nexus_auth::{TokenConfig, TokenTtls};
use nexus_infra::config::ensure_secure_secret;
use nexus_infra::{ConfigError, EnvSource, Environment, RateLimitRule, RedisConfig};
use nexus_observability::LogFormat;

use crate::routes::Backend;

pub const DEFAULT_PORT: u16 = 3006;
pub const DEFAULT_JWT_SECRET: &str = "nexus_jwt_secret_key_dev_only";
pub const DEFAULT_IDENTITY_URL: &str = "http://localhost:3001";

/// Base URLs of the backends the gateway fronts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUrls {
    pub identity: String,
    pub tenant: String,
    pub user: String,
    pub payroll: String,
    pub connector: String,
}

impl ServiceUrls {
    fn from_env(env: &EnvSource) -> Self {
        let identity = env.get_or("IDENTITY_SERVICE_URL", DEFAULT_IDENTITY_URL);
        Self {
            tenant: env.get_or("TENANT_SERVICE_URL", "http://localhost:3005"),
            // User management lives in the identity service unless split out.
            user: env.get_or("USER_SERVICE_URL", &identity),
            payroll: env.get_or("PAYROLL_SERVICE_URL", "http://localhost:3004"),
            connector: env.get_or("CONNECTOR_SERVICE_URL", "http://localhost:3007"),
            identity,
        }
    }

    pub fn url_for(&self, backend: Backend) -> &str {
        let url = match backend {
            Backend::Identity => &self.identity,
            Backend::Tenant => &self.tenant,
            Backend::User => &self.user,
            Backend::Payroll => &self.payroll,
            Backend::Connector => &self.connector,
        };
        url.trim_end_matches('/')
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RateLimits {
    /// Budget for every request from one client IP.
    pub default: RateLimitRule,
    /// Additional budget for credential-accepting endpoints.
    pub auth: RateLimitRule,
}

/// Gateway configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub environment: Environment,
    pub port: u16,
    /// Verifies caller tokens and signs debug tokens; never issues user tokens.
    pub token: TokenConfig,
    /// `None` binds tenants from the token claim only.
    pub tenant_database_url: Option<String>,
    pub redis: RedisConfig,
    pub services: ServiceUrls,
    pub proxy_timeout: Duration,
    pub rate_limits: RateLimits,
    /// A proxy in front of the gateway appends the real client to `X-Forwarded-For`.
    pub trust_proxy: bool,
    pub cors_origins: Vec<String>,
    pub service_token_cookie: String,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl GatewayConfig {
    pub fn from_env(env: &EnvSource) -> Result<Self, ConfigError> {
        let environment = env.environment()?;

        let secret = env.get_or("JWT_SECRET", DEFAULT_JWT_SECRET);
        ensure_secure_secret(environment, &secret)?;

        let defaults = TokenTtls::default();
        let token = TokenConfig {
            ttls: TokenTtls {
                debug: Duration::from_secs(env.parse_or("DEBUG_TOKEN_TTL_SECS", defaults.debug.as_secs())?),
                ..defaults
            },
            leeway_secs: env.parse_or("JWT_LEEWAY_SECS", 0)?,
            ..TokenConfig::new(secret)
        };

        let window = Duration::from_secs(env.parse_or::<u64>("RATE_LIMIT_WINDOW", 15)? * 60);
        let rate_limits = RateLimits {
            default: RateLimitRule::new(window, env.parse_or("RATE_LIMIT_MAX_REQUESTS", 100)?),
            auth: RateLimitRule::new(
                Duration::from_secs(15 * 60),
                env.parse_or("AUTH_RATE_LIMIT_MAX_REQUESTS", 5)?,
            ),
        };

        Ok(Self {
            environment,
            port: env.parse_or("PORT", DEFAULT_PORT)?,
            token,
            tenant_database_url: env.get("TENANT_DATABASE_URL"),
            redis: RedisConfig::from_env(env)?,
            services: ServiceUrls::from_env(env),
            proxy_timeout: Duration::from_secs(env.parse_or("PROXY_TIMEOUT_SECS", 15)?),
            rate_limits,
            trust_proxy: env.flag_or("TRUST_PROXY", false)?,
            cors_origins: env.list_or("CORS_ORIGINS", "http://localhost:3000"),
            service_token_cookie: env.get_or("SERVICE_TOKEN_COOKIE", "connector_token"),
            log_level: env.get_or("LOG_LEVEL", "info"),
            log_format: env.parse_or("LOG_FORMAT", LogFormat::Json)?,
        })
    }
}
