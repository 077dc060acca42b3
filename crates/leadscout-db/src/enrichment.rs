//! The `enrichment_events` outbox consumed by the external enrichment worker.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::DbError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EnrichmentEventRow {
    pub id: i64,
    pub tenant_id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEnrichmentEvent {
    pub tenant_id: String,
    /// `single` or `batch`.
    pub kind: &'static str,
    pub payload: serde_json::Value,
}

/// Append events to the outbox on the caller's connection, so they commit
/// or roll back with whatever else the caller's transaction wrote.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any insert fails.
pub(crate) async fn insert_enrichment_events(
    conn: &mut PgConnection,
    events: &[NewEnrichmentEvent],
) -> Result<(), DbError> {
    for event in events {
        sqlx::query("INSERT INTO enrichment_events (tenant_id, kind, payload) VALUES ($1, $2, $3)")
            .bind(&event.tenant_id)
            .bind(event.kind)
            .bind(&event.payload)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Oldest pending events first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] on query failure.
pub async fn list_pending_enrichment_events(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<EnrichmentEventRow>, DbError> {
    let rows = sqlx::query_as::<_, EnrichmentEventRow>(
        "SELECT id, tenant_id, kind, payload, status, created_at \
         FROM enrichment_events WHERE status = 'pending' \
         ORDER BY created_at, id LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
