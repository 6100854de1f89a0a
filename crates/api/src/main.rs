//! Courtside API server binary

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use courtside_api::{routes::create_router, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = courtside_shared::db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    {
        let migration_pool = courtside_shared::db::create_migration_pool(&config.database_url)
            .await
            .context("Failed to create migration pool")?;
        courtside_shared::db::run_migrations(&migration_pool)
            .await
            .context("Failed to run migrations")?;
        migration_pool.close().await;
    }

    let bind_address = config.bind_address.clone();
    let state = AppState::new(config, pool).context("Failed to build application state")?;

    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;

    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, router)
        .await
        .context("Server exited with error")?;

    Ok(())
}
