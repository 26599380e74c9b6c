//! Passhub Background Worker
//!
//! Handles scheduled jobs including:
//! - Pending charge reconciliation for redirect providers (every minute)
//! - Membership expiry sweep (daily at 3:00 AM UTC)
//! - Health check heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use passhub_engine::EngineService;
use sqlx::postgres::PgPoolOptions;
use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    #[allow(clippy::expect_used)] // Fail-fast on startup if required config is missing
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Passhub Worker");

    // Create database pool
    let pool = create_db_pool().await?;

    // Create engine service
    let engine = match EngineService::from_env(pool.clone()) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            // If the invite function isn't configured, run in minimal mode
            warn!(error = %e, "Failed to create engine service - running in minimal mode");
            info!("Worker running without invite-link provisioning");

            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                info!("Worker heartbeat (minimal mode)");
            }
        }
    };

    // Create scheduler
    let scheduler = JobScheduler::new().await?;

    // Job 1: Reconcile pending redirect-provider charges (every minute)
    // Tickets past the completion-assumption threshold get settled; tickets
    // past the abandonment threshold get discarded.
    let reconcile_engine = engine.clone();
    scheduler
        .add(Job::new_async("0 * * * * *", move |_uuid, _l| {
            let engine = reconcile_engine.clone();
            Box::pin(async move {
                if engine.pending.is_empty().await {
                    return;
                }
                let (settled, discarded) = engine
                    .orchestrator
                    .reconcile_all(OffsetDateTime::now_utc())
                    .await;
                if settled > 0 || discarded > 0 {
                    info!(
                        settled = settled,
                        discarded = discarded,
                        "Pending charge reconciliation complete"
                    );
                }
            })
        })?)
        .await?;
    info!("Scheduled: Pending charge reconciliation (every minute)");

    // Job 2: Membership expiry sweep (daily at 3:00 AM UTC)
    let expiry_engine = engine.clone();
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_uuid, _l| {
            let engine = expiry_engine.clone();
            Box::pin(async move {
                info!("Running membership expiry sweep");
                match engine
                    .memberships
                    .expire_lapsed(OffsetDateTime::now_utc())
                    .await
                {
                    Ok(expired) => info!(expired = expired, "Membership expiry sweep complete"),
                    Err(e) => error!(error = %e, "Membership expiry sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Membership expiry sweep (daily at 3:00 UTC)");

    // Job 3: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    scheduler.start().await?;
    info!("Worker started, all jobs scheduled");

    // Keep the worker alive
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
