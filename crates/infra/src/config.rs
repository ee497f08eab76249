//! Environment-driven configuration primitives.
//!
//! Service crates build their own config structs on top of [`EnvSource`];
//! reading through a lookup closure keeps parsing testable without touching
//! the process environment.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use nexus_auth::token::is_insecure_secret;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("{0} must be set")]
    Missing(String),

    #[error("JWT secret is a development default or too short; refusing to start in {0}")]
    InsecureSecret(Environment),
}

/// Deployment environment, from `APP_ENV`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Test => "test",
            Self::Production => "production",
        }
    }

    pub fn is_development(&self) -> bool {
        *self == Self::Development
    }

    /// Development defaults (secrets, in-memory stores) are tolerated here.
    pub fn allows_dev_defaults(&self) -> bool {
        matches!(self, Self::Development | Self::Test)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

/// Refuse known development secrets outside development and test.
pub fn ensure_secure_secret(environment: Environment, secret: &str) -> Result<(), ConfigError> {
    if !environment.allows_dev_defaults() && is_insecure_secret(secret) {
        return Err(ConfigError::InsecureSecret(environment));
    }
    Ok(())
}

/// Key/value source for configuration. Empty values count as unset.
pub struct EnvSource {
    lookup: Box<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl EnvSource {
    /// Read from the process environment.
    pub fn process() -> Self {
        Self {
            lookup: Box::new(|key| std::env::var(key).ok()),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            lookup: Box::new(move |key| map.get(key).cloned()),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }

    pub fn flag_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(v) => Err(ConfigError::Invalid {
                key: key.to_string(),
                value: v,
                reason: "expected a boolean".to_string(),
            }),
        }
    }

    pub fn environment(&self) -> Result<Environment, ConfigError> {
        self.parse_or("APP_ENV", Environment::Development)
    }

    /// Comma-separated list, trimmed, empties dropped.
    pub fn list_or(&self, key: &str, default: &str) -> Vec<String> {
        self.get_or(key, default)
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl fmt::Debug for EnvSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EnvSource")
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub connect_timeout: Duration,
    /// Upper bound for any single cache command before it is treated as a miss.
    pub op_timeout: Duration,
}

impl RedisConfig {
    pub fn from_env(env: &EnvSource) -> Result<Self, ConfigError> {
        Ok(Self {
            host: env.get_or("REDIS_HOST", "localhost"),
            port: env.parse_or("REDIS_PORT", 6379)?,
            password: env.get("REDIS_PASSWORD"),
            connect_timeout: Duration::from_millis(env.parse_or("REDIS_CONNECT_TIMEOUT_MS", 2_000)?),
            op_timeout: Duration::from_millis(env.parse_or("CACHE_OP_TIMEOUT_MS", 250)?),
        })
    }

    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}", password, self.host, self.port),
            None => format!("redis://{}:{}", self.host, self.port),
        }
    }
}

impl fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset_or_empty() {
        let env = EnvSource::from_pairs([("REDIS_HOST", "  "), ("REDIS_PORT", "6380")]);
        let redis = RedisConfig::from_env(&env).unwrap();
        assert_eq!(redis.host, "localhost");
        assert_eq!(redis.port, 6380);
        assert_eq!(redis.url(), "redis://localhost:6380");
        assert_eq!(env.environment().unwrap(), Environment::Development);
    }

    #[test]
    fn password_is_embedded_in_url_but_not_debug() {
        let env = EnvSource::from_pairs([("REDIS_PASSWORD", "hunter2")]);
        let redis = RedisConfig::from_env(&env).unwrap();
        assert_eq!(redis.url(), "redis://:hunter2@localhost:6379");
        assert!(!format!("{redis:?}").contains("hunter2"));
    }

    #[test]
    fn bad_number_names_the_key() {
        let env = EnvSource::from_pairs([("REDIS_PORT", "sixty")]);
        let err = RedisConfig::from_env(&env).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "REDIS_PORT"));
    }

    #[test]
    fn default_secret_is_refused_in_production_only() {
        let dev_secret = "nexus_jwt_secret_key_dev_only";
        assert!(ensure_secure_secret(Environment::Development, dev_secret).is_ok());
        assert!(ensure_secure_secret(Environment::Test, dev_secret).is_ok());
        assert_eq!(
            ensure_secure_secret(Environment::Production, dev_secret),
            Err(ConfigError::InsecureSecret(Environment::Production))
        );
        assert!(
            ensure_secure_secret(Environment::Production, "f3b9c1d0a8e74e52b6d4c2a1908f7e6d5c4b3a29").is_ok()
        );
    }

    #[test]
    fn flags_and_lists() {
        let env = EnvSource::from_pairs([
            ("TRUST_PROXY", "off"),
            ("CORS_ORIGINS", "http://a.test, ,http://b.test"),
        ]);
        assert!(!env.flag_or("TRUST_PROXY", true).unwrap());
        assert_eq!(env.list_or("CORS_ORIGINS", ""), vec!["http://a.test", "http://b.test"]);
    }
}
