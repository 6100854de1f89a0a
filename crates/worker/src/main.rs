//! Courtside worker binary
//!
//! Runs scheduled maintenance jobs. Currently: nightly card-expiry
//! marking.

mod jobs;

use anyhow::Context;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    let pool = courtside_shared::db::create_pool(&database_url)
        .await
        .context("Failed to create database pool")?;

    let scheduler = JobScheduler::new()
        .await
        .context("Failed to create scheduler")?;

    // Card-expiry marking, nightly at 03:00 UTC
    let job_pool = pool.clone();
    let expiring_cards_job = Job::new_async("0 0 3 * * *", move |_id, _scheduler| {
        let pool = job_pool.clone();
        Box::pin(async move {
            jobs::expiring_cards::run(&pool).await;
        })
    })
    .context("Failed to build expiring-cards job")?;

    scheduler
        .add(expiring_cards_job)
        .await
        .context("Failed to schedule expiring-cards job")?;

    scheduler.start().await.context("Failed to start scheduler")?;

    tracing::info!("Worker started");

    // Run one pass at startup so a long-stopped worker catches up
    jobs::expiring_cards::run(&pool).await;

    // Keep the process alive for the scheduler
    loop {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
    }
}
