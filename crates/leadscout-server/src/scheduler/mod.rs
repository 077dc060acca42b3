//! Background job scheduler.
//!
//! Registers one scan job per platform, the webhook job (lead notifications
//! then the retry sweep) and the daily retention purge.

mod notify;

use std::sync::Arc;

use chrono::Utc;
use leadscout_core::{AppConfig, Platform};
use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::api::{AppState, Pipeline, Webhooks};

/// Daily at 03:30 UTC.
const RETENTION_CRON: &str = "0 30 3 * * *";
const STAGE_MEMO_RETENTION_DAYS: i64 = 7;
const SWEEP_BATCH: usize = 200;

/// Builds and starts the background job scheduler.
///
/// The returned [`JobScheduler`] must be kept alive for the lifetime of the
/// process; dropping it shuts down all jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised, a
/// cron expression is invalid, or the scheduler fails to start.
pub async fn build_scheduler(
    state: &AppState,
    config: &AppConfig,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    for platform in Platform::ALL {
        register_scan_job(
            &scheduler,
            &config.scan_cron,
            platform,
            Arc::clone(&state.pipeline),
        )
        .await?;
    }
    register_webhook_job(&scheduler, &config.webhook_sweep_cron, state.clone()).await?;
    register_retention_job(
        &scheduler,
        state.pool.clone(),
        Arc::clone(&state.webhooks),
        config.webhook_retention_days,
    )
    .await?;

    scheduler.start().await?;
    tracing::info!(
        platforms = Platform::ALL.len(),
        scan_cron = %config.scan_cron,
        sweep_cron = %config.webhook_sweep_cron,
        "scheduler: started"
    );
    Ok(scheduler)
}

/// One platform's ingestion cycle. Cycles for different platforms run
/// independently, so a slow or unconfigured source never delays another.
async fn register_scan_job(
    scheduler: &JobScheduler,
    cron: &str,
    platform: Platform,
    pipeline: Arc<Pipeline>,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let pipeline = Arc::clone(&pipeline);

        Box::pin(async move {
            match pipeline.run_platform_cycle(platform, Utc::now()).await {
                Ok(report) if report.platform_skipped => {
                    tracing::debug!(platform = %platform, "scheduler: platform skipped");
                }
                Ok(report) => {
                    tracing::info!(
                        platform = %platform,
                        cycle_id = %report.cycle_id,
                        processed = report.processed,
                        failed = report.failed,
                        new_results = report.new_results,
                        "scheduler: scan cycle finished"
                    );
                }
                Err(e) => {
                    tracing::error!(platform = %platform, error = %e, "scheduler: scan cycle failed");
                }
            }
        })
    })?;

    scheduler.add(job).await?;
    Ok(())
}

/// Notify enriched leads, then retry due deliveries.
async fn register_webhook_job(
    scheduler: &JobScheduler,
    cron: &str,
    state: AppState,
) -> Result<(), JobSchedulerError> {
    let state = Arc::new(state);

    let job = Job::new_async(cron, move |_uuid, _lock| {
        let state = Arc::clone(&state);

        Box::pin(async move {
            let now = Utc::now();
            match notify::notify_enriched(&state, now).await {
                Ok(report) if report.claimed > 0 => {
                    tracing::info!(
                        claimed = report.claimed,
                        notifications = report.notifications,
                        "scheduler: lead notifications sent"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "scheduler: lead notification failed"),
            }
            if let Err(e) = state.webhooks.sweep_due(now, SWEEP_BATCH).await {
                tracing::error!(error = %e, "scheduler: webhook sweep failed");
            }
        })
    })?;

    scheduler.add(job).await?;
    Ok(())
}

/// Purge old webhook deliveries and stage memos.
async fn register_retention_job(
    scheduler: &JobScheduler,
    pool: PgPool,
    webhooks: Arc<Webhooks>,
    retention_days: u32,
) -> Result<(), JobSchedulerError> {
    let pool = Arc::new(pool);

    let job = Job::new_async(RETENTION_CRON, move |_uuid, _lock| {
        let pool = Arc::clone(&pool);
        let webhooks = Arc::clone(&webhooks);

        Box::pin(async move {
            tracing::info!("scheduler: starting retention purge");
            let now = Utc::now();

            if let Err(e) = webhooks.purge(now, retention_days).await {
                tracing::error!(error = %e, "scheduler: delivery purge failed");
            }

            let cutoff = now - chrono::Duration::days(STAGE_MEMO_RETENTION_DAYS);
            match leadscout_db::purge_stage_memos_before(&pool, cutoff).await {
                Ok(purged) => tracing::info!(purged, "scheduler: purged stage memos"),
                Err(e) => tracing::error!(error = %e, "scheduler: stage memo purge failed"),
            }
        })
    })?;

    scheduler.add(job).await?;
    Ok(())
}
