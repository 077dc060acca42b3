//! Pure domain logic for leadscout.
//!
//! Nothing in this crate performs I/O: the query matcher, lead scorer,
//! entitlement gate and stagger calculator all take plain values so they can
//! be called with stale or batch-prefetched data and unit-tested directly.

pub mod app_config;
pub mod cache;
pub mod config;
pub mod matcher;
pub mod plans;
pub mod platform;
pub mod query;
pub mod schedule;
pub mod scoring;
pub mod stagger;
pub mod types;

use thiserror::Error;

pub use app_config::{AppConfig, Environment};
pub use cache::{Clock, FixedClock, SystemClock, TtlCache};
pub use config::{cron_interval_minutes, load_app_config, load_app_config_from_env};
pub use matcher::{
    content_matches_monitor, match_content, CompiledMonitorMatcher, MatchContent, MatchOutcome,
    MatchType, MonitorMatch, MonitorMatchConfig,
};
pub use plans::{
    can_access_platform, can_trigger_manual_scan, check_keywords_limit, check_monitor_limit,
    plan_for, scan_claim_is_live, should_process_monitor, stale_claim_cutoff,
    within_manual_daily_cap, KeywordLimitCheck, ManualScanCheck, MonitorLimitCheck, Plan, Tier,
    STALE_SCAN_MINUTES,
};
pub use platform::{Platform, UnknownPlatform};
pub use query::{parse_query, validate_query, Field, FieldFilter, ParsedQuery, QueryValidation};
pub use schedule::ActiveHours;
pub use scoring::{score_lead, ConversationCategory, LeadScore, LeadScoreInput};
pub use stagger::{base_stagger_delay, stagger_delay, STAGGER_MIN_BATCH};
pub use types::CandidateItem;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}
