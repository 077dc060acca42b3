//! Storage seam for the ingestion pipeline.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadscout_core::{ActiveHours, MonitorMatchConfig, Platform, Tier};
use leadscout_db::{ManualClaim, MonitorRow, NewResult, PersistOutcome};

use crate::dispatch::EnrichmentEvent;
use crate::PipelineError;

/// A monitor as the pipeline sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorRecord {
    pub id: i64,
    pub tenant_id: String,
    pub name: String,
    pub keywords: Vec<String>,
    pub boolean_query: Option<String>,
    pub company_name: Option<String>,
    pub platforms: Vec<Platform>,
    pub target_urls: BTreeMap<Platform, String>,
    pub active_hours: Option<ActiveHours>,
    pub is_active: bool,
    /// Last completed check on the platform being scanned. For a monitor
    /// loaded outside a platform cycle, the latest check on any platform.
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_manual_scan_at: Option<DateTime<Utc>>,
}

impl MonitorRecord {
    #[must_use]
    pub fn match_config(&self) -> MonitorMatchConfig {
        MonitorMatchConfig {
            keywords: self.keywords.clone(),
            boolean_query: self.boolean_query.clone(),
            company_name: self.company_name.clone(),
        }
    }

    #[must_use]
    pub fn target_url(&self, platform: Platform) -> Option<&str> {
        self.target_urls.get(&platform).map(String::as_str)
    }
}

impl From<MonitorRow> for MonitorRecord {
    /// Unknown platform ids and malformed JSON columns are dropped with a
    /// warning rather than failing the whole monitor.
    fn from(row: MonitorRow) -> Self {
        let platforms = row
            .platforms
            .iter()
            .filter_map(|p| match p.parse::<Platform>() {
                Ok(platform) => Some(platform),
                Err(e) => {
                    tracing::warn!(monitor_id = row.id, error = %e, "ingest: ignoring unknown platform");
                    None
                }
            })
            .collect();

        let target_urls = match serde_json::from_value::<HashMap<String, String>>(row.target_urls) {
            Ok(map) => map
                .into_iter()
                .filter_map(|(k, v)| Some((k.parse::<Platform>().ok()?, v)))
                .collect(),
            Err(e) => {
                tracing::warn!(monitor_id = row.id, error = %e, "ingest: malformed target_urls");
                BTreeMap::new()
            }
        };

        let active_hours = row.active_hours.and_then(|value| {
            serde_json::from_value::<ActiveHours>(value)
                .map_err(|e| {
                    tracing::warn!(monitor_id = row.id, error = %e, "ingest: malformed active_hours");
                })
                .ok()
        });

        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            keywords: row.keywords,
            boolean_query: row.boolean_query,
            company_name: row.company_name,
            platforms,
            target_urls,
            active_hours,
            is_active: row.is_active,
            last_checked_at: row.last_checked_at,
            last_manual_scan_at: row.last_manual_scan_at,
        }
    }
}

#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Active monitors with `platform` enabled; `last_checked_at` is the
    /// per-platform check time.
    async fn monitors_for_platform(
        &self,
        platform: Platform,
    ) -> Result<Vec<MonitorRecord>, PipelineError>;

    async fn monitor(&self, id: i64) -> Result<Option<MonitorRecord>, PipelineError>;

    /// Prefetch tiers for a batch of tenants. Tenants billing has never
    /// reported on resolve to [`Tier::Free`].
    async fn tenant_tiers(
        &self,
        tenant_ids: &[String],
    ) -> Result<HashMap<String, Tier>, PipelineError>;

    async fn tenant_tier(&self, tenant_id: &str) -> Result<Tier, PipelineError>;

    /// Claim one platform of a monitor for a scheduled scan. `false` while
    /// a live claim on the same platform or a live manual claim exists.
    /// Claims older than [`STALE_SCAN_MINUTES`](leadscout_core::STALE_SCAN_MINUTES)
    /// are taken over.
    async fn claim_scan(
        &self,
        monitor_id: i64,
        platform: Platform,
        now: DateTime<Utc>,
    ) -> Result<bool, PipelineError>;

    async fn release_scan(&self, monitor_id: i64, platform: Platform) -> Result<(), PipelineError>;

    /// Claim the whole monitor for a manual scan, stamp the manual-scan time
    /// and count it against `daily_cap` scans since `day_start`, atomically.
    async fn claim_manual_scan(
        &self,
        monitor_id: i64,
        tenant_id: &str,
        now: DateTime<Utc>,
        day_start: DateTime<Utc>,
        daily_cap: u32,
    ) -> Result<ManualClaim, PipelineError>;

    async fn release_manual_scan(&self, monitor_id: i64) -> Result<(), PipelineError>;

    /// Which of `urls` are already stored for the monitor (single batched
    /// lookup).
    async fn existing_source_urls(
        &self,
        monitor_id: i64,
        urls: &[String],
    ) -> Result<HashSet<String>, PipelineError>;

    /// Insert results, bump the tenant's usage counter and append the
    /// enrichment events `plan` derives from the outcome, as one unit.
    /// Either all of it is stored or none of it is.
    async fn persist_results(
        &self,
        tenant_id: &str,
        results: &[NewResult],
        plan: &(dyn for<'o> Fn(&'o PersistOutcome) -> Vec<EnrichmentEvent> + Send + Sync),
    ) -> Result<PersistOutcome, PipelineError>;

    async fn record_check(
        &self,
        monitor_id: i64,
        platform: Platform,
        checked_at: DateTime<Utc>,
        new_matches: usize,
    ) -> Result<(), PipelineError>;
}
