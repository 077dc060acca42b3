//! Database operations for `results` and `tenant_usage`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::enrichment::{insert_enrichment_events, NewEnrichmentEvent};
use crate::DbError;

/// A row from the `results` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResultRow {
    pub id: i64,
    pub monitor_id: i64,
    pub tenant_id: String,
    pub platform: String,
    pub source_url: String,
    pub title: String,
    pub body: String,
    pub author: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub engagement_metric: Option<f64>,
    pub platform_metadata: serde_json::Value,
    pub match_type: String,
    pub matched_terms: Vec<String>,
    pub lead_score: i32,
    pub sentiment: Option<String>,
    pub ai_summary: Option<String>,
    pub conversation_category: Option<String>,
    pub enriched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewResult {
    pub monitor_id: i64,
    pub platform: String,
    pub source_url: String,
    pub title: String,
    pub body: String,
    pub author: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub engagement_metric: Option<f64>,
    pub platform_metadata: serde_json::Value,
    pub match_type: String,
    pub matched_terms: Vec<String>,
    pub lead_score: i32,
}

/// What one persist step wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistOutcome {
    /// Ids of rows actually inserted, in input order.
    pub inserted_ids: Vec<i64>,
    /// The tenant's lifetime result count before this insert.
    pub tenant_results_before: i64,
    /// Outbox events written in the same transaction.
    #[serde(default)]
    pub enrichment_events: usize,
}

#[derive(Debug, Clone)]
pub struct EnrichmentUpdate {
    pub sentiment: Option<String>,
    pub ai_summary: Option<String>,
    pub conversation_category: Option<String>,
    pub lead_score: i32,
}

const RESULT_COLUMNS: &str = "id, monitor_id, tenant_id, platform, source_url, title, body, \
     author, posted_at, engagement_metric, platform_metadata, match_type, matched_terms, \
     lead_score, sentiment, ai_summary, conversation_category, enriched_at, created_at";

/// Which of `urls` already exist for the monitor, in a single query.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] on query failure.
pub async fn existing_source_urls(
    pool: &PgPool,
    monitor_id: i64,
    urls: &[String],
) -> Result<HashSet<String>, DbError> {
    if urls.is_empty() {
        return Ok(HashSet::new());
    }
    let rows = sqlx::query_scalar::<_, String>(
        "SELECT source_url FROM results WHERE monitor_id = $1 AND source_url = ANY($2)",
    )
    .bind(monitor_id)
    .bind(urls)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().collect())
}

/// Insert results, bump the tenant's monthly usage counter and append the
/// enrichment outbox events planned from the outcome, all in one
/// transaction. Rows whose `(monitor_id, source_url)` already exist are
/// skipped, and only rows actually inserted count toward usage.
///
/// A per-tenant advisory lock is held for the whole transaction, so
/// `tenant_results_before` cannot be read by two concurrent persists for the
/// same tenant before either commits.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails or [`DbError::Encode`]
/// if `plan_events` fails; nothing is committed in either case.
pub async fn insert_results_with_usage<F>(
    pool: &PgPool,
    tenant_id: &str,
    results: &[NewResult],
    plan_events: F,
) -> Result<PersistOutcome, DbError>
where
    F: FnOnce(&PersistOutcome) -> Result<Vec<NewEnrichmentEvent>, serde_json::Error>,
{
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(format!("results:{tenant_id}"))
        .execute(&mut *tx)
        .await?;

    let tenant_results_before =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM results WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_one(&mut *tx)
            .await?;

    let mut inserted_ids = Vec::with_capacity(results.len());
    for result in results {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO results (monitor_id, tenant_id, platform, source_url, title, body, \
                                  author, posted_at, engagement_metric, platform_metadata, \
                                  match_type, matched_terms, lead_score) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (monitor_id, source_url) DO NOTHING \
             RETURNING id",
        )
        .bind(result.monitor_id)
        .bind(tenant_id)
        .bind(&result.platform)
        .bind(&result.source_url)
        .bind(&result.title)
        .bind(&result.body)
        .bind(&result.author)
        .bind(result.posted_at)
        .bind(result.engagement_metric)
        .bind(&result.platform_metadata)
        .bind(&result.match_type)
        .bind(&result.matched_terms)
        .bind(result.lead_score)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(id) = id {
            inserted_ids.push(id);
        }
    }

    if !inserted_ids.is_empty() {
        let count = i64::try_from(inserted_ids.len()).unwrap_or(i64::MAX);
        sqlx::query(
            "INSERT INTO tenant_usage (tenant_id, period_start, results_count) \
             VALUES ($1, date_trunc('month', NOW())::date, $2) \
             ON CONFLICT (tenant_id, period_start) DO UPDATE \
               SET results_count = tenant_usage.results_count + EXCLUDED.results_count, \
                   updated_at = NOW()",
        )
        .bind(tenant_id)
        .bind(count)
        .execute(&mut *tx)
        .await?;
    }

    let mut outcome = PersistOutcome {
        inserted_ids,
        tenant_results_before,
        enrichment_events: 0,
    };
    let events = plan_events(&outcome)?;
    insert_enrichment_events(&mut *tx, &events).await?;
    outcome.enrichment_events = events.len();

    tx.commit().await?;
    Ok(outcome)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] on query failure.
pub async fn get_result(pool: &PgPool, id: i64) -> Result<Option<ResultRow>, DbError> {
    let sql = format!("SELECT {RESULT_COLUMNS} FROM results WHERE id = $1");
    let row = sqlx::query_as::<_, ResultRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] on query failure.
pub async fn count_results_for_monitor(pool: &PgPool, monitor_id: i64) -> Result<i64, DbError> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM results WHERE monitor_id = $1")
        .bind(monitor_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Write enrichment output back onto a result. Only the enrichment columns
/// and the score change.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no result has that id, or
/// [`DbError::Sqlx`] on query failure.
pub async fn apply_enrichment(
    pool: &PgPool,
    id: i64,
    update: &EnrichmentUpdate,
) -> Result<ResultRow, DbError> {
    let sql = format!(
        "UPDATE results \
         SET sentiment = $2, ai_summary = $3, conversation_category = $4, lead_score = $5, \
             enriched_at = NOW() \
         WHERE id = $1 \
         RETURNING {RESULT_COLUMNS}"
    );
    sqlx::query_as::<_, ResultRow>(&sql)
        .bind(id)
        .bind(&update.sentiment)
        .bind(&update.ai_summary)
        .bind(&update.conversation_category)
        .bind(update.lead_score)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

/// Claim up to `limit` enriched results that have not been announced yet.
///
/// `notified_at` is stamped in the same statement and locked rows are
/// skipped, so concurrent sweeps never return the same result twice.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] on query failure.
pub async fn claim_unnotified_results(
    pool: &PgPool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<ResultRow>, DbError> {
    let sql = format!(
        "UPDATE results SET notified_at = $1 \
         WHERE id IN (SELECT id FROM results \
                      WHERE enriched_at IS NOT NULL AND notified_at IS NULL \
                      ORDER BY id LIMIT $2 \
                      FOR UPDATE SKIP LOCKED) \
         RETURNING {RESULT_COLUMNS}"
    );
    let rows = sqlx::query_as::<_, ResultRow>(&sql)
        .bind(now)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}
