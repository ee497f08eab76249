use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use nexus_auth::{PasswordHasher, TokenService};
use nexus_identity::seed::seed_development;
use nexus_identity::{IdentityConfig, IdentityServices, build_app};
use nexus_infra::{
    Cache, CredentialStore, Database, DisabledCache, EnvSource, InMemoryCredentialStore,
    PostgresCredentialStore, RedisCache,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = IdentityConfig::from_env(&EnvSource::process()).context("invalid configuration")?;
    nexus_observability::init(config.log_format, &config.log_level);

    let hasher = PasswordHasher::new(config.bcrypt_cost);

    let database = match &config.database_url {
        Some(url) => Some(
            Database::connect(url, config.database_max_connections)
                .await
                .context("failed to connect to postgres")?,
        ),
        None => None,
    };
    let store: Arc<dyn CredentialStore> = match &database {
        Some(db) => Arc::new(PostgresCredentialStore::new(db.pool().clone())),
        None => {
            warn!(environment = %config.environment, "DATABASE_URL not set; using seeded in-memory store");
            let store = InMemoryCredentialStore::new();
            seed_development(&store, &hasher).context("failed to seed development data")?;
            Arc::new(store)
        }
    };

    let cache: Arc<dyn Cache> = match RedisCache::connect(&config.redis).await {
        Ok(redis) => Arc::new(redis),
        Err(e) => {
            warn!(error = %e, "redis unavailable; permission cache disabled");
            Arc::new(DisabledCache)
        }
    };

    let services = Arc::new(IdentityServices::new(
        store,
        cache,
        Arc::new(TokenService::new(config.token.clone())),
        hasher,
        config.permission_cache_ttl,
        config.environment,
    ));

    let app = build_app(services, &config);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, environment = %config.environment, "identity service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(db) = database {
        db.close().await;
    }
    info!("identity service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
