//! Webhook maintenance commands.

use std::sync::Arc;

use chrono::Utc;
use leadscout_core::AppConfig;
use leadscout_webhook::{PgDeliveryStore, WebhookEngine};
use sqlx::PgPool;

fn engine(pool: PgPool, config: &AppConfig) -> anyhow::Result<WebhookEngine<PgDeliveryStore>> {
    Ok(WebhookEngine::new(
        Arc::new(PgDeliveryStore::new(pool)),
        config.webhook_timeout_secs,
        &config.connector_user_agent,
        config.webhook_max_attempts,
    )?)
}

/// Attempt every due `retrying` delivery once.
pub(crate) async fn sweep(pool: PgPool, config: &AppConfig, limit: usize) -> anyhow::Result<()> {
    let report = engine(pool, config)?.sweep_due(Utc::now(), limit).await?;
    println!(
        "attempted {} deliveries: {} succeeded, {} retrying, {} failed",
        report.attempted, report.succeeded, report.retrying, report.failed
    );
    Ok(())
}

pub(crate) async fn purge(pool: PgPool, config: &AppConfig, days: u32) -> anyhow::Result<()> {
    let purged = engine(pool, config)?.purge(Utc::now(), days).await?;
    println!("purged {purged} deliveries older than {days} days");
    Ok(())
}
