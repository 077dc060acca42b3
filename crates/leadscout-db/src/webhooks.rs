//! Database operations for `webhooks` and `webhook_deliveries`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WebhookRow {
    pub id: i64,
    pub tenant_id: String,
    pub url: String,
    pub secret: String,
    pub events: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWebhook {
    pub tenant_id: String,
    pub url: String,
    pub secret: String,
    pub events: Vec<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeliveryRow {
    pub id: i64,
    pub webhook_id: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_status_code: Option<i32>,
    pub last_error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// State written after one delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryAttemptUpdate {
    pub status: String,
    pub attempt_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_status_code: Option<i32>,
    pub last_error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

const WEBHOOK_COLUMNS: &str = "id, tenant_id, url, secret, events, is_active, created_at";

const DELIVERY_COLUMNS: &str = "id, webhook_id, event_type, payload, status, attempt_count, \
     max_attempts, next_retry_at, last_status_code, last_error, completed_at, created_at";

// ---------------------------------------------------------------------------
// webhooks
// ---------------------------------------------------------------------------

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn create_webhook(pool: &PgPool, webhook: &NewWebhook) -> Result<WebhookRow, DbError> {
    let sql = format!(
        "INSERT INTO webhooks (tenant_id, url, secret, events) VALUES ($1, $2, $3, $4) \
         RETURNING {WEBHOOK_COLUMNS}"
    );
    let row = sqlx::query_as::<_, WebhookRow>(&sql)
        .bind(&webhook.tenant_id)
        .bind(&webhook.url)
        .bind(&webhook.secret)
        .bind(&webhook.events)
        .fetch_one(pool)
        .await?;
    Ok(row)
}

/// Active webhooks for a tenant subscribed to `event_type`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] on query failure.
pub async fn list_active_webhooks(
    pool: &PgPool,
    tenant_id: &str,
    event_type: &str,
) -> Result<Vec<WebhookRow>, DbError> {
    let sql = format!(
        "SELECT {WEBHOOK_COLUMNS} FROM webhooks \
         WHERE tenant_id = $1 AND is_active AND $2 = ANY(events) ORDER BY id"
    );
    let rows = sqlx::query_as::<_, WebhookRow>(&sql)
        .bind(tenant_id)
        .bind(event_type)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// webhook_deliveries
// ---------------------------------------------------------------------------

/// Create a delivery in `pending` status.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn create_delivery(
    pool: &PgPool,
    webhook_id: i64,
    event_type: &str,
    payload: &serde_json::Value,
    max_attempts: i32,
) -> Result<DeliveryRow, DbError> {
    let sql = format!(
        "INSERT INTO webhook_deliveries (webhook_id, event_type, payload, max_attempts) \
         VALUES ($1, $2, $3, $4) RETURNING {DELIVERY_COLUMNS}"
    );
    let row = sqlx::query_as::<_, DeliveryRow>(&sql)
        .bind(webhook_id)
        .bind(event_type)
        .bind(payload)
        .bind(max_attempts)
        .fetch_one(pool)
        .await?;
    Ok(row)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] on query failure.
pub async fn get_delivery(pool: &PgPool, id: i64) -> Result<Option<DeliveryRow>, DbError> {
    let sql = format!("SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries WHERE id = $1");
    let row = sqlx::query_as::<_, DeliveryRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Persist the outcome of an attempt. Terminal rows (`success`, `failed`)
/// are never reopened, and the write only lands if the row still has the
/// attempt count the attempt started from.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the delivery does not exist, is already
/// terminal, or was recorded by another attempt first; [`DbError::Sqlx`] on
/// query failure.
pub async fn record_delivery_attempt(
    pool: &PgPool,
    id: i64,
    update: &DeliveryAttemptUpdate,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE webhook_deliveries \
         SET status = $2, attempt_count = $3, next_retry_at = $4, last_status_code = $5, \
             last_error = $6, completed_at = $7 \
         WHERE id = $1 AND status IN ('pending', 'retrying') AND attempt_count = $3 - 1",
    )
    .bind(id)
    .bind(&update.status)
    .bind(update.attempt_count)
    .bind(update.next_retry_at)
    .bind(update.last_status_code)
    .bind(&update.last_error)
    .bind(update.completed_at)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Claim `retrying` deliveries whose retry time has passed, joined with
/// their webhook. Inactive webhooks are skipped.
///
/// Claimed rows have `next_retry_at` pushed to `lease_until` in the same
/// statement, and rows locked by a concurrent sweep are skipped, so two
/// sweeps never pick up the same delivery. A sweeper that dies mid-attempt
/// leaves the row due again once the lease passes.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] on query failure.
pub async fn claim_due_deliveries(
    pool: &PgPool,
    now: DateTime<Utc>,
    lease_until: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<(DeliveryRow, WebhookRow)>, DbError> {
    let sql = format!(
        "UPDATE webhook_deliveries SET next_retry_at = $2 \
         WHERE id IN ( \
           SELECT d.id FROM webhook_deliveries d \
           WHERE d.status = 'retrying' AND d.next_retry_at <= $1 \
             AND EXISTS (SELECT 1 FROM webhooks w WHERE w.id = d.webhook_id AND w.is_active) \
           ORDER BY d.next_retry_at, d.id LIMIT $3 \
           FOR UPDATE SKIP LOCKED) \
         RETURNING {DELIVERY_COLUMNS}"
    );
    let mut deliveries = sqlx::query_as::<_, DeliveryRow>(&sql)
        .bind(now)
        .bind(lease_until)
        .bind(limit)
        .fetch_all(pool)
        .await?;

    if deliveries.is_empty() {
        return Ok(Vec::new());
    }
    deliveries.sort_by_key(|d| d.id);

    let webhook_ids: Vec<i64> = deliveries.iter().map(|d| d.webhook_id).collect();
    let webhook_sql = format!("SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE id = ANY($1)");
    let webhooks = sqlx::query_as::<_, WebhookRow>(&webhook_sql)
        .bind(&webhook_ids)
        .fetch_all(pool)
        .await?;

    Ok(deliveries
        .into_iter()
        .filter_map(|d| {
            let webhook = webhooks.iter().find(|w| w.id == d.webhook_id)?.clone();
            Some((d, webhook))
        })
        .collect())
}

/// Delete deliveries created before `cutoff`, whatever their status.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] on query failure.
pub async fn purge_deliveries_before(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<u64, DbError> {
    let result = sqlx::query("DELETE FROM webhook_deliveries WHERE created_at < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
