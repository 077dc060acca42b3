//! User-triggered scans: cooldown, daily cap and the monitor-wide claim.

use chrono::{DateTime, Duration, Utc};
use leadscout_core::{can_trigger_manual_scan, plan_for, Tier};
use leadscout_db::ManualClaim;

use crate::store::{MonitorRecord, PipelineStore};
use crate::PipelineError;

#[derive(Debug, Clone, PartialEq)]
pub enum ManualScanOutcome {
    /// The claim is held; the caller must run the scan and release it.
    Accepted { monitor: MonitorRecord, tier: Tier },
    /// Missing, or owned by another tenant.
    NotFound,
    Inactive,
    InProgress,
    Cooldown {
        remaining: Duration,
        next_scan_at: DateTime<Utc>,
    },
    DailyCap { limit: u32 },
}

/// Start of the UTC day containing `now`.
fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Validate and claim a manual scan for `monitor_id` on behalf of `tenant_id`.
///
/// The cooldown is checked against the loaded monitor; the in-progress and
/// daily-cap checks happen inside the store's claim, so concurrent requests
/// cannot both pass them.
///
/// # Errors
///
/// Returns [`PipelineError`] if a store lookup fails.
pub async fn request_manual_scan<S: PipelineStore + ?Sized>(
    store: &S,
    monitor_id: i64,
    tenant_id: &str,
    tier: Tier,
    now: DateTime<Utc>,
) -> Result<ManualScanOutcome, PipelineError> {
    let Some(monitor) = store.monitor(monitor_id).await? else {
        return Ok(ManualScanOutcome::NotFound);
    };
    if monitor.tenant_id != tenant_id {
        return Ok(ManualScanOutcome::NotFound);
    }
    if !monitor.is_active {
        return Ok(ManualScanOutcome::Inactive);
    }

    let cooldown = can_trigger_manual_scan(tier, monitor.last_manual_scan_at, now);
    if !cooldown.can_scan {
        if let Some(next_scan_at) = cooldown.next_scan_at {
            return Ok(ManualScanOutcome::Cooldown {
                remaining: cooldown.cooldown_remaining,
                next_scan_at,
            });
        }
    }

    let limit = plan_for(tier).manual_scans_per_day;
    let scans_today = match store
        .claim_manual_scan(monitor_id, tenant_id, now, day_start(now), limit)
        .await?
    {
        ManualClaim::Claimed { scans_today } => scans_today,
        // Deactivated or deleted between the lookup and the claim.
        ManualClaim::Missing => return Ok(ManualScanOutcome::Inactive),
        ManualClaim::InProgress => return Ok(ManualScanOutcome::InProgress),
        ManualClaim::DailyCap => return Ok(ManualScanOutcome::DailyCap { limit }),
    };

    tracing::info!(
        monitor_id,
        tenant_id,
        tier = %tier,
        scans_today,
        "manual: scan accepted"
    );

    Ok(ManualScanOutcome::Accepted { monitor, tier })
}
