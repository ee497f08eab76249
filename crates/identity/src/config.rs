use std::time::Duration;

use nexus_auth::{ServiceClient, TokenConfig, TokenTtls};
use nexus_infra::config::ensure_secure_secret;
use nexus_infra::{ConfigError, EnvSource, Environment, RedisConfig, PROFILE_CACHE_TTL};
use nexus_observability::LogFormat;

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_JWT_SECRET: &str = "nexus_jwt_secret_key_dev_only";

/// Identity service configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub environment: Environment,
    pub port: u16,
    pub token: TokenConfig,
    /// `None` means the seeded in-memory store; refused outside development/test.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub redis: RedisConfig,
    pub permission_cache_ttl: Duration,
    pub bcrypt_cost: u32,
    pub cors_origins: Vec<String>,
    pub service_token_cookie: String,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl IdentityConfig {
    pub fn from_env(env: &EnvSource) -> Result<Self, ConfigError> {
        let environment = env.environment()?;

        let secret = env.get_or("JWT_SECRET", DEFAULT_JWT_SECRET);
        ensure_secure_secret(environment, &secret)?;

        let database_url = env.get("DATABASE_URL");
        if database_url.is_none() && !environment.allows_dev_defaults() {
            return Err(ConfigError::Missing("DATABASE_URL".to_string()));
        }

        let defaults = TokenTtls::default();
        let token = TokenConfig {
            secret,
            ttls: TokenTtls {
                user: Duration::from_secs(env.parse_or("JWT_EXPIRES_IN_SECS", defaults.user.as_secs())?),
                service: Duration::from_secs(
                    env.parse_or("SERVICE_TOKEN_TTL_SECS", defaults.service.as_secs())?,
                ),
                debug: defaults.debug,
            },
            service_clients: ServiceClient::parse_list(&env.get_or("SERVICE_CLIENTS", "")),
            leeway_secs: env.parse_or("JWT_LEEWAY_SECS", 0)?,
        };

        Ok(Self {
            environment,
            port: env.parse_or("PORT", DEFAULT_PORT)?,
            token,
            database_url,
            database_max_connections: env.parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            redis: RedisConfig::from_env(env)?,
            permission_cache_ttl: Duration::from_secs(
                env.parse_or("PERMISSION_CACHE_TTL_SECS", PROFILE_CACHE_TTL.as_secs())?,
            ),
            bcrypt_cost: env.parse_or("BCRYPT_COST", 12)?,
            cors_origins: env.list_or("CORS_ORIGINS", "http://localhost:3000"),
            service_token_cookie: env.get_or("SERVICE_TOKEN_COOKIE", "connector_token"),
            log_level: env.get_or("LOG_LEVEL", "info"),
            log_format: env.parse_or("LOG_FORMAT", LogFormat::Json)?,
        })
    }
}
