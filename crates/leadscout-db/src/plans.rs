//! Tenant tier strings supplied by the billing provider.

use std::collections::HashMap;

use sqlx::PgPool;

use crate::DbError;

/// Raw tier string for a tenant, or `None` when billing has never reported one.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] on query failure.
pub async fn get_tenant_tier(pool: &PgPool, tenant_id: &str) -> Result<Option<String>, DbError> {
    let tier = sqlx::query_scalar::<_, String>("SELECT tier FROM tenant_plans WHERE tenant_id = $1")
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?;
    Ok(tier)
}

/// Batch-prefetch tiers for a set of tenants in one query. Tenants without a
/// row are absent from the map.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] on query failure.
pub async fn list_tenant_tiers(
    pool: &PgPool,
    tenant_ids: &[String],
) -> Result<HashMap<String, String>, DbError> {
    if tenant_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = sqlx::query_as::<_, (String, String)>(
        "SELECT tenant_id, tier FROM tenant_plans WHERE tenant_id = ANY($1)",
    )
    .bind(tenant_ids)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().collect())
}

/// Insert or replace a tenant's tier.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] on query failure.
pub async fn upsert_tenant_plan(pool: &PgPool, tenant_id: &str, tier: &str) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO tenant_plans (tenant_id, tier) VALUES ($1, $2) \
         ON CONFLICT (tenant_id) DO UPDATE SET tier = EXCLUDED.tier, updated_at = NOW()",
    )
    .bind(tenant_id)
    .bind(tier)
    .execute(pool)
    .await?;
    Ok(())
}
