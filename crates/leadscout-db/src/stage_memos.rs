//! Memoized stage outputs keyed by `(cycle_id, stage, entity_id)`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

/// # Errors
///
/// Returns [`DbError::Sqlx`] on query failure.
pub async fn get_stage_memo(
    pool: &PgPool,
    cycle_id: &str,
    stage: &str,
    entity_id: &str,
) -> Result<Option<serde_json::Value>, DbError> {
    let output = sqlx::query_scalar::<_, serde_json::Value>(
        "SELECT output FROM stage_memos WHERE cycle_id = $1 AND stage = $2 AND entity_id = $3",
    )
    .bind(cycle_id)
    .bind(stage)
    .bind(entity_id)
    .fetch_optional(pool)
    .await?;
    Ok(output)
}

/// Store a stage output. The first write wins; later writes for the same key
/// are ignored.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] on query failure.
pub async fn put_stage_memo(
    pool: &PgPool,
    cycle_id: &str,
    stage: &str,
    entity_id: &str,
    output: &serde_json::Value,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO stage_memos (cycle_id, stage, entity_id, output) VALUES ($1, $2, $3, $4) \
         ON CONFLICT (cycle_id, stage, entity_id) DO NOTHING",
    )
    .bind(cycle_id)
    .bind(stage)
    .bind(entity_id)
    .bind(output)
    .execute(pool)
    .await?;
    Ok(())
}

/// Returns the number of memos deleted.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] on query failure.
pub async fn purge_stage_memos_before(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<u64, DbError> {
    let result = sqlx::query("DELETE FROM stage_memos WHERE created_at < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
