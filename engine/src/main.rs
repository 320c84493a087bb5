//! fxrates daemon
//!
//! Opens the connection pool, prepares the schema and serves the exchange
//! service until interrupted.

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fxrates_engine::{Backend, ExchangeService, ServiceConfig};
use fxrates_pool::{ConnectionPool, ManageConnection};
use fxrates_store::{migrations, CurrencyStore, MemoryConnectionManager, PgConnectionManager, RateStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting fxratesd");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    match config.backend() {
        Some(Backend::Postgres) => {
            let manager = PgConnectionManager::from_url(
                &config.database_url,
                config.username.as_deref(),
                config.password.as_deref(),
            )?;
            let pool = ConnectionPool::initialize(manager, config.pool.clone())
                .await
                .context("Failed to open database connections")?;

            let mut conn = pool.borrow().await?;
            migrations::run(&mut conn)
                .await
                .context("Failed to apply schema")?;
            conn.release().await?;

            serve(ExchangeService::new(pool)).await
        }
        Some(Backend::Memory) => {
            let pool = ConnectionPool::initialize(MemoryConnectionManager::new(), config.pool.clone())
                .await?;
            serve(ExchangeService::new(pool)).await
        }
        None => Err(anyhow::anyhow!(
            "Unsupported database URL: {}",
            config.database_url
        )),
    }
}

async fn serve<M>(service: ExchangeService<M>) -> anyhow::Result<()>
where
    M: ManageConnection,
    M::Connection: CurrencyStore + RateStore,
{
    info!(pool_size = service.pool().config().size, "fxratesd ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Shutdown signal received");

    service.shutdown().await;

    let stats = service.stats();
    info!(
        borrows = stats.pool.borrows,
        peak_in_use = stats.pool.peak_in_use,
        resolutions = stats.resolver.total(),
        "fxratesd shutdown complete"
    );
    Ok(())
}
