//! Database operations for `monitors`, `monitor_platform_checks`,
//! `monitor_scan_claims` and `manual_scans`.

use chrono::{DateTime, Utc};
use leadscout_core::stale_claim_cutoff;
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `monitors` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MonitorRow {
    pub id: i64,
    pub public_id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub keywords: Vec<String>,
    pub boolean_query: Option<String>,
    pub company_name: Option<String>,
    pub platforms: Vec<String>,
    /// Map of platform id to target URL.
    pub target_urls: serde_json::Value,
    pub active_hours: Option<serde_json::Value>,
    pub is_active: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_manual_scan_at: Option<DateTime<Utc>>,
    pub new_match_count: i32,
    pub scan_in_progress: bool,
    pub created_at: DateTime<Utc>,
}

/// A monitor as seen by one platform's cycle: `last_checked_at` is the
/// check time for that platform only.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PlatformMonitorRow {
    #[sqlx(flatten)]
    pub monitor: MonitorRow,
    pub platform_last_checked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewMonitor {
    pub tenant_id: String,
    pub name: String,
    pub keywords: Vec<String>,
    pub boolean_query: Option<String>,
    pub company_name: Option<String>,
    pub platforms: Vec<String>,
    pub target_urls: serde_json::Value,
    pub active_hours: Option<serde_json::Value>,
}

const MONITOR_COLUMNS: &str = "m.id, m.public_id, m.tenant_id, m.name, m.keywords, \
     m.boolean_query, m.company_name, m.platforms, m.target_urls, m.active_hours, \
     m.is_active, m.last_checked_at, m.last_manual_scan_at, m.new_match_count, \
     m.scan_in_progress, m.created_at";

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn create_monitor(pool: &PgPool, monitor: &NewMonitor) -> Result<MonitorRow, DbError> {
    let sql = format!(
        "WITH m AS ( \
           INSERT INTO monitors (public_id, tenant_id, name, keywords, boolean_query, \
                                 company_name, platforms, target_urls, active_hours) \
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
           RETURNING * \
         ) SELECT {MONITOR_COLUMNS} FROM m"
    );
    let row = sqlx::query_as::<_, MonitorRow>(&sql)
        .bind(Uuid::new_v4())
        .bind(&monitor.tenant_id)
        .bind(&monitor.name)
        .bind(&monitor.keywords)
        .bind(&monitor.boolean_query)
        .bind(&monitor.company_name)
        .bind(&monitor.platforms)
        .bind(&monitor.target_urls)
        .bind(&monitor.active_hours)
        .fetch_one(pool)
        .await?;
    Ok(row)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] on query failure.
pub async fn get_monitor(pool: &PgPool, id: i64) -> Result<Option<MonitorRow>, DbError> {
    let sql = format!("SELECT {MONITOR_COLUMNS} FROM monitors m WHERE m.id = $1");
    let row = sqlx::query_as::<_, MonitorRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Active monitors for a tenant; used for the monitor-count ceiling.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] on query failure.
pub async fn count_tenant_monitors(pool: &PgPool, tenant_id: &str) -> Result<i64, DbError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM monitors WHERE tenant_id = $1 AND is_active",
    )
    .bind(tenant_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Active monitors that have `platform` enabled, joined with their
/// per-platform last check. Ordered by id so batch positions are stable.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] on query failure.
pub async fn list_active_monitors_for_platform(
    pool: &PgPool,
    platform: &str,
) -> Result<Vec<PlatformMonitorRow>, DbError> {
    let sql = format!(
        "SELECT {MONITOR_COLUMNS}, c.last_checked_at AS platform_last_checked_at \
         FROM monitors m \
         LEFT JOIN monitor_platform_checks c \
           ON c.monitor_id = m.id AND c.platform = $1 \
         WHERE m.is_active AND $1 = ANY(m.platforms) \
         ORDER BY m.id"
    );
    let rows = sqlx::query_as::<_, PlatformMonitorRow>(&sql)
        .bind(platform)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Outcome of [`claim_manual_scan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualClaim {
    /// The claim was taken; `scans_today` includes this one.
    Claimed { scans_today: u32 },
    /// No active monitor with that id belongs to the tenant.
    Missing,
    /// A live manual or platform claim already covers the monitor.
    InProgress,
    /// The tenant already used its manual scans for the day.
    DailyCap,
}

/// Claim one platform of a monitor for a scheduled scan.
///
/// The monitor row is locked so the check against a live manual claim and
/// the claim insert act as one step. A platform claim older than
/// [`STALE_SCAN_MINUTES`](leadscout_core::STALE_SCAN_MINUTES) is taken over;
/// a manual flag with no start time never blocks.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails.
pub async fn claim_platform_scan(
    pool: &PgPool,
    id: i64,
    platform: &str,
    now: DateTime<Utc>,
) -> Result<bool, DbError> {
    let stale_before = stale_claim_cutoff(now);
    let mut tx = pool.begin().await?;

    let manual = sqlx::query_as::<_, (bool, Option<DateTime<Utc>>)>(
        "SELECT scan_in_progress, scan_started_at FROM monitors \
         WHERE id = $1 AND is_active FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?;

    let blocked = match manual {
        None => true,
        Some((in_progress, started_at)) => {
            in_progress && started_at.is_some_and(|at| at >= stale_before)
        }
    };
    if blocked {
        tx.rollback().await?;
        return Ok(false);
    }

    let claimed = sqlx::query_scalar::<_, i64>(
        "INSERT INTO monitor_scan_claims (monitor_id, platform, started_at) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (monitor_id, platform) DO UPDATE SET started_at = EXCLUDED.started_at \
         WHERE monitor_scan_claims.started_at < $4 \
         RETURNING monitor_id",
    )
    .bind(id)
    .bind(platform)
    .bind(now)
    .bind(stale_before)
    .fetch_optional(&mut *tx)
    .await?
    .is_some();

    tx.commit().await?;
    Ok(claimed)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the delete fails.
pub async fn release_platform_scan(pool: &PgPool, id: i64, platform: &str) -> Result<(), DbError> {
    sqlx::query("DELETE FROM monitor_scan_claims WHERE monitor_id = $1 AND platform = $2")
        .bind(id)
        .bind(platform)
        .execute(pool)
        .await?;
    Ok(())
}

/// Claim a monitor for a manual scan and count it against the tenant's
/// daily cap in one transaction.
///
/// A per-tenant advisory lock serialises manual claims, so two requests for
/// different monitors cannot both read the count below `daily_cap`. The
/// monitor row lock excludes concurrent platform claims.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails.
pub async fn claim_manual_scan(
    pool: &PgPool,
    id: i64,
    tenant_id: &str,
    now: DateTime<Utc>,
    day_start: DateTime<Utc>,
    daily_cap: u32,
) -> Result<ManualClaim, DbError> {
    let stale_before = stale_claim_cutoff(now);
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(format!("manual:{tenant_id}"))
        .execute(&mut *tx)
        .await?;

    let Some((in_progress, started_at)) = sqlx::query_as::<_, (bool, Option<DateTime<Utc>>)>(
        "SELECT scan_in_progress, scan_started_at FROM monitors \
         WHERE id = $1 AND tenant_id = $2 AND is_active FOR UPDATE",
    )
    .bind(id)
    .bind(tenant_id)
    .fetch_optional(&mut *tx)
    .await?
    else {
        tx.rollback().await?;
        return Ok(ManualClaim::Missing);
    };

    let platform_busy = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM monitor_scan_claims \
                        WHERE monitor_id = $1 AND started_at >= $2)",
    )
    .bind(id)
    .bind(stale_before)
    .fetch_one(&mut *tx)
    .await?;

    let manual_busy = in_progress && started_at.is_some_and(|at| at >= stale_before);
    if manual_busy || platform_busy {
        tx.rollback().await?;
        return Ok(ManualClaim::InProgress);
    }

    let used = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM manual_scans WHERE tenant_id = $1 AND started_at >= $2",
    )
    .bind(tenant_id)
    .bind(day_start)
    .fetch_one(&mut *tx)
    .await?;
    let used = u32::try_from(used).unwrap_or(u32::MAX);
    if used >= daily_cap {
        tx.rollback().await?;
        return Ok(ManualClaim::DailyCap);
    }

    sqlx::query(
        "UPDATE monitors \
         SET scan_in_progress = true, scan_started_at = $2, last_manual_scan_at = $2, \
             updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO manual_scans (tenant_id, monitor_id, started_at) VALUES ($1, $2, $3)")
        .bind(tenant_id)
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(ManualClaim::Claimed {
        scans_today: used.saturating_add(1),
    })
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn release_manual_scan(pool: &PgPool, id: i64) -> Result<(), DbError> {
    sqlx::query(
        "UPDATE monitors SET scan_in_progress = false, scan_started_at = NULL, updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a completed platform check: upserts the per-platform timestamp and
/// bumps the monitor's last-checked time and new-match counter.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails.
pub async fn record_platform_check(
    pool: &PgPool,
    id: i64,
    platform: &str,
    checked_at: DateTime<Utc>,
    new_matches: i32,
) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO monitor_platform_checks (monitor_id, platform, last_checked_at) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (monitor_id, platform) DO UPDATE SET last_checked_at = EXCLUDED.last_checked_at",
    )
    .bind(id)
    .bind(platform)
    .bind(checked_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE monitors \
         SET last_checked_at = GREATEST(COALESCE(last_checked_at, $2), $2), \
             new_match_count = new_match_count + $3, \
             updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(checked_at)
    .bind(new_matches)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
