use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use nexus_api::middleware::TenantBinding;
use nexus_gateway::services::local_cache_fallback;
use nexus_gateway::{GatewayConfig, GatewayServices, build_app};
use nexus_infra::{Cache, Database, EnvSource, PostgresMembershipStore, RedisCache};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env(&EnvSource::process()).context("invalid configuration")?;
    nexus_observability::init(config.log_format, &config.log_level);

    let (cache, local_cache): (Arc<dyn Cache>, bool) = match RedisCache::connect(&config.redis).await {
        Ok(redis) => (Arc::new(redis), false),
        Err(e) => {
            let fallback = local_cache_fallback(config.environment, e)
                .context("redis is required for shared rate limits")?;
            (Arc::new(fallback), true)
        }
    };

    let database = match &config.tenant_database_url {
        Some(url) => Some(
            Database::connect(url, 5)
                .await
                .context("failed to connect to the tenant database")?,
        ),
        None => None,
    };
    let tenants = match &database {
        Some(db) => TenantBinding::verified(Arc::new(PostgresMembershipStore::new(db.pool().clone()))),
        None => {
            warn!("TENANT_DATABASE_URL not set; only home tenants can be bound");
            TenantBinding::claim_only()
        }
    };

    let port = config.port;
    let environment = config.environment;
    let mut services = GatewayServices::new(config, cache, tenants).context("failed to build proxy client")?;
    if local_cache {
        services = services.with_local_cache();
    }
    let services = Arc::new(services);
    let app = build_app(services);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, %environment, "gateway listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(db) = database {
        db.close().await;
    }
    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
