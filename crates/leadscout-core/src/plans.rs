//! Subscription tiers and the entitlement gate.
//!
//! Every function here takes the tier as a plain value and performs no I/O,
//! so callers can use a plan map prefetched once per cycle.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::platform::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Starter,
    Pro,
    Enterprise,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Free, Tier::Starter, Tier::Pro, Tier::Enterprise];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Starter => "starter",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }

    /// Resolve a billing tier string. Unknown or missing tiers fall back to
    /// [`Tier::Free`].
    #[must_use]
    pub fn from_billing(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("starter") => Tier::Starter,
            Some("pro") => Tier::Pro,
            Some("enterprise") => Tier::Enterprise,
            _ => Tier::Free,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource ceilings and feature flags attached to a tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub tier: Tier,
    pub max_monitors: u32,
    pub max_keywords_per_monitor: u32,
    pub platforms: &'static [Platform],
    pub refresh_delay_hours: i64,
    pub manual_scan_cooldown_minutes: i64,
    pub manual_scans_per_day: u32,
    pub ai_analysis: bool,
    pub webhooks: bool,
}

const FREE_PLATFORMS: &[Platform] = &[Platform::Reddit, Platform::HackerNews];

const STARTER_PLATFORMS: &[Platform] = &[
    Platform::Reddit,
    Platform::HackerNews,
    Platform::ProductHunt,
    Platform::DevTo,
    Platform::GitHub,
    Platform::StackOverflow,
    Platform::Lobsters,
];

const PRO_PLATFORMS: &[Platform] = &[
    Platform::Reddit,
    Platform::HackerNews,
    Platform::ProductHunt,
    Platform::DevTo,
    Platform::GitHub,
    Platform::StackOverflow,
    Platform::Lobsters,
    Platform::Quora,
    Platform::YouTube,
    Platform::G2,
    Platform::Capterra,
    Platform::Trustpilot,
];

static FREE: Plan = Plan {
    tier: Tier::Free,
    max_monitors: 1,
    max_keywords_per_monitor: 3,
    platforms: FREE_PLATFORMS,
    refresh_delay_hours: 24,
    manual_scan_cooldown_minutes: 6 * 60,
    manual_scans_per_day: 1,
    ai_analysis: false,
    webhooks: false,
};

static STARTER: Plan = Plan {
    tier: Tier::Starter,
    max_monitors: 3,
    max_keywords_per_monitor: 10,
    platforms: STARTER_PLATFORMS,
    refresh_delay_hours: 12,
    manual_scan_cooldown_minutes: 2 * 60,
    manual_scans_per_day: 5,
    ai_analysis: true,
    webhooks: false,
};

static PRO: Plan = Plan {
    tier: Tier::Pro,
    max_monitors: 10,
    max_keywords_per_monitor: 25,
    platforms: PRO_PLATFORMS,
    refresh_delay_hours: 4,
    manual_scan_cooldown_minutes: 30,
    manual_scans_per_day: 20,
    ai_analysis: true,
    webhooks: true,
};

static ENTERPRISE: Plan = Plan {
    tier: Tier::Enterprise,
    max_monitors: 50,
    max_keywords_per_monitor: 100,
    platforms: &Platform::ALL,
    refresh_delay_hours: 1,
    manual_scan_cooldown_minutes: 10,
    manual_scans_per_day: 100,
    ai_analysis: true,
    webhooks: true,
};

#[must_use]
pub fn plan_for(tier: Tier) -> &'static Plan {
    match tier {
        Tier::Free => &FREE,
        Tier::Starter => &STARTER,
        Tier::Pro => &PRO,
        Tier::Enterprise => &ENTERPRISE,
    }
}

#[must_use]
pub fn can_access_platform(tier: Tier, platform: Platform) -> bool {
    plan_for(tier).platforms.contains(&platform)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeywordLimitCheck {
    pub allowed: bool,
    pub current: u32,
    pub limit: u32,
    pub message: Option<String>,
}

/// Check a keyword list against the tier's per-monitor ceiling. Blank
/// entries are not counted.
#[must_use]
pub fn check_keywords_limit(keywords: &[String], tier: Tier) -> KeywordLimitCheck {
    let limit = plan_for(tier).max_keywords_per_monitor;
    let current = u32::try_from(keywords.iter().filter(|k| !k.trim().is_empty()).count())
        .unwrap_or(u32::MAX);
    let allowed = current <= limit;
    let message = (!allowed).then(|| {
        format!("the {tier} plan allows at most {limit} keywords per monitor (got {current})")
    });
    KeywordLimitCheck {
        allowed,
        current,
        limit,
        message,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorLimitCheck {
    pub allowed: bool,
    pub current: u32,
    pub limit: u32,
}

/// Whether a tenant that already owns `current` monitors may create another.
#[must_use]
pub fn check_monitor_limit(tier: Tier, current: u32) -> MonitorLimitCheck {
    let limit = plan_for(tier).max_monitors;
    MonitorLimitCheck {
        allowed: current < limit,
        current,
        limit,
    }
}

/// True when the tier's refresh delay has elapsed since `last_checked_at`,
/// or when the monitor has never been checked.
#[must_use]
pub fn should_process_monitor(
    tier: Tier,
    last_checked_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    let Some(last) = last_checked_at else {
        return true;
    };
    now - last >= Duration::hours(plan_for(tier).refresh_delay_hours)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualScanCheck {
    pub can_scan: bool,
    /// Zero when `can_scan` is true.
    pub cooldown_remaining: Duration,
    /// `None` when a scan may start now.
    pub next_scan_at: Option<DateTime<Utc>>,
}

/// Check the manual-scan cooldown, which is tighter than the automatic
/// refresh delay.
#[must_use]
pub fn can_trigger_manual_scan(
    tier: Tier,
    last_manual_scan_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> ManualScanCheck {
    let ready = ManualScanCheck {
        can_scan: true,
        cooldown_remaining: Duration::zero(),
        next_scan_at: None,
    };
    let Some(last) = last_manual_scan_at else {
        return ready;
    };

    let next = last + Duration::minutes(plan_for(tier).manual_scan_cooldown_minutes);
    if now >= next {
        return ready;
    }

    ManualScanCheck {
        can_scan: false,
        cooldown_remaining: next - now,
        next_scan_at: Some(next),
    }
}

/// Whether another manual scan fits under the tier's per-day cap.
#[must_use]
pub fn within_manual_daily_cap(tier: Tier, scans_today: u32) -> bool {
    scans_today < plan_for(tier).manual_scans_per_day
}

/// A scan claim older than this is treated as abandoned by a crashed worker
/// and may be taken over.
pub const STALE_SCAN_MINUTES: i64 = 60;

/// Whether a scan claim taken at `started_at` still blocks other scans.
#[must_use]
pub fn scan_claim_is_live(started_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - started_at < Duration::minutes(STALE_SCAN_MINUTES)
}

/// Claims taken before this instant are stale.
#[must_use]
pub fn stale_claim_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::minutes(STALE_SCAN_MINUTES)
}
