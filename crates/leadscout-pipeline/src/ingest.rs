//! One platform's scan cycle.
//!
//! `FETCH_MONITORS -> PREFETCH_PLANS -> per monitor: GATE -> CLAIM ->
//! FETCH_CANDIDATES -> MATCH -> DEDUP -> PERSIST + DISPATCH_ANALYSIS ->
//! UPDATE_STATS -> RELEASE`.
//!
//! Results, the usage counter and the enrichment outbox events planned for
//! them are written as one unit, so a new result never exists without its
//! analysis request.
//!
//! Each monitor's work after the gate runs as memoized stages keyed by the
//! cycle id, so re-running a cycle inside the same slot skips whatever a
//! previous run already finished. A failure in one monitor is logged and
//! counted; it never aborts the other monitors in the cycle.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use leadscout_core::{
    can_access_platform, plan_for, score_lead, should_process_monitor, stagger_delay, AppConfig,
    CandidateItem, CompiledMonitorMatcher, LeadScoreInput, MatchType, MonitorMatchConfig,
    Platform, Tier,
};
use leadscout_db::{NewResult, PersistOutcome};
use serde::{Deserialize, Serialize};

use crate::connector::{Connector, ConnectorError, FetchRequest};
use crate::dispatch::{plan_analysis, DispatchInput};
use crate::stage::{CycleId, StageKey, StageRunner, StageStore};
use crate::store::{MonitorRecord, PipelineStore};
use crate::PipelineError;

const STAGE_FETCH_MATCH: &str = "fetch_match";
const STAGE_PERSIST: &str = "persist";
const STAGE_RECORD_CHECK: &str = "record_check";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub fetch_timeout: Duration,
    pub jitter_ratio: f64,
    pub batch_threshold: usize,
    pub max_concurrent_monitors: usize,
    pub slot_minutes: u32,
}

impl PipelineSettings {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            fetch_timeout: Duration::from_secs(config.connector_timeout_secs),
            jitter_ratio: config.stagger_jitter_ratio,
            batch_threshold: config.analysis_batch_threshold,
            max_concurrent_monitors: config.scan_max_concurrent_monitors.max(1),
            slot_minutes: config.scan_slot_minutes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Scheduled,
    /// User-triggered: bypasses the refresh delay and active hours. The
    /// caller holds the manual claim on the whole monitor.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Inactive,
    PlatformNotAllowed,
    RefreshNotDue,
    NotInActiveHours,
    MissingTargetUrl,
    ScanInProgress,
    ConnectorNotConfigured,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    Skipped(SkipReason),
    Completed {
        new_results: usize,
        enrichment_events: usize,
    },
    Failed(String),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub cycle_id: String,
    pub platform: Option<Platform>,
    /// Set when the connector is not configured and the cycle did nothing.
    pub platform_skipped: bool,
    pub monitors_total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub new_results: usize,
    pub enrichment_events: usize,
}

impl CycleReport {
    fn tally(&mut self, outcome: &MonitorOutcome) {
        match outcome {
            MonitorOutcome::Skipped(_) => self.skipped += 1,
            MonitorOutcome::Completed {
                new_results,
                enrichment_events,
            } => {
                self.processed += 1;
                self.new_results += new_results;
                self.enrichment_events += enrichment_events;
            }
            MonitorOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// A candidate that passed the monitor's matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedCandidate {
    pub item: CandidateItem,
    pub match_type: MatchType,
    pub matched_terms: Vec<String>,
}

/// Gate a monitor for one platform. Pure: the tier comes from the
/// prefetched plan map.
///
/// # Errors
///
/// Returns the first reason the monitor must not be scanned now.
pub fn gate_monitor(
    monitor: &MonitorRecord,
    tier: Tier,
    platform: Platform,
    now: DateTime<Utc>,
    mode: ScanMode,
) -> Result<(), SkipReason> {
    if !monitor.is_active {
        return Err(SkipReason::Inactive);
    }
    if !can_access_platform(tier, platform) {
        return Err(SkipReason::PlatformNotAllowed);
    }
    if platform.requires_target_url() && monitor.target_url(platform).is_none() {
        return Err(SkipReason::MissingTargetUrl);
    }
    if mode == ScanMode::Scheduled {
        if !should_process_monitor(tier, monitor.last_checked_at, now) {
            return Err(SkipReason::RefreshNotDue);
        }
        if let Some(hours) = &monitor.active_hours {
            if !hours.is_active(now) {
                return Err(SkipReason::NotInActiveHours);
            }
        }
    }
    Ok(())
}

/// Keywords the tier still allows. A monitor created before a downgrade may
/// carry more; only the first `limit` are used.
fn effective_keywords(monitor: &MonitorRecord, tier: Tier) -> Vec<String> {
    let limit = usize::try_from(plan_for(tier).max_keywords_per_monitor).unwrap_or(usize::MAX);
    let keywords: Vec<String> = monitor
        .keywords
        .iter()
        .filter(|k| !k.trim().is_empty())
        .cloned()
        .collect();
    if keywords.len() > limit {
        tracing::warn!(
            monitor_id = monitor.id,
            tenant_id = %monitor.tenant_id,
            keywords = keywords.len(),
            limit,
            "ingest: monitor exceeds keyword limit for {tier}, matching first {limit} only"
        );
        return keywords.into_iter().take(limit).collect();
    }
    keywords
}

/// Delays for a batch of `total` due monitors, computed up front so the
/// thread-local RNG is never held across an await.
fn batch_delays(total: usize, window: Duration, jitter_ratio: f64) -> Vec<Duration> {
    let mut rng = rand::rng();
    (0..total)
        .map(|index| stagger_delay(index, total, window, jitter_ratio, &mut rng))
        .collect()
}

pub struct IngestPipeline<S, C, M> {
    store: Arc<S>,
    connector: Arc<C>,
    stages: StageRunner<M>,
    settings: PipelineSettings,
}

impl<S, C, M> IngestPipeline<S, C, M>
where
    S: PipelineStore,
    C: Connector,
    M: StageStore,
{
    pub fn new(store: Arc<S>, connector: Arc<C>, stage_store: M, settings: PipelineSettings) -> Self {
        Self {
            store,
            connector,
            stages: StageRunner::new(stage_store),
            settings,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run one scan cycle for `platform`.
    ///
    /// Per-monitor failures are counted in the report, not returned.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] only when the monitor list or the plan
    /// prefetch cannot be loaded.
    pub async fn run_platform_cycle(
        &self,
        platform: Platform,
        now: DateTime<Utc>,
    ) -> Result<CycleReport, PipelineError> {
        let cycle_id = CycleId::for_slot(platform, now, self.settings.slot_minutes);
        let mut report = CycleReport {
            cycle_id: cycle_id.to_string(),
            platform: Some(platform),
            ..CycleReport::default()
        };

        if let Err(e) = self.connector.ensure_configured(platform) {
            tracing::warn!(platform = %platform, error = %e, "ingest: skipping platform cycle");
            report.platform_skipped = true;
            return Ok(report);
        }

        let monitors = self.store.monitors_for_platform(platform).await?;
        report.monitors_total = monitors.len();
        if monitors.is_empty() {
            tracing::debug!(platform = %platform, "ingest: no monitors for platform");
            return Ok(report);
        }

        let tenant_ids: Vec<String> = monitors
            .iter()
            .map(|m| m.tenant_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let tiers = self.store.tenant_tiers(&tenant_ids).await?;

        let mut due: Vec<(MonitorRecord, Tier)> = Vec::new();
        for monitor in monitors {
            let tier = tiers.get(&monitor.tenant_id).copied().unwrap_or(Tier::Free);
            match gate_monitor(&monitor, tier, platform, now, ScanMode::Scheduled) {
                Ok(()) => due.push((monitor, tier)),
                Err(reason) => {
                    tracing::debug!(
                        platform = %platform,
                        monitor_id = monitor.id,
                        reason = ?reason,
                        "ingest: monitor gated"
                    );
                    report.tally(&MonitorOutcome::Skipped(reason));
                }
            }
        }

        let delays = batch_delays(due.len(), platform.stagger_window(), self.settings.jitter_ratio);
        let started = tokio::time::Instant::now();

        tracing::info!(
            platform = %platform,
            cycle_id = %cycle_id,
            due = due.len(),
            gated = report.skipped,
            "ingest: starting cycle"
        );

        let outcomes: Vec<MonitorOutcome> = stream::iter(due.into_iter().zip(delays))
            .map(|((monitor, tier), delay)| {
                let cycle_id = &cycle_id;
                async move {
                    tokio::time::sleep_until(started + delay).await;
                    self.scan_monitor(cycle_id, platform, &monitor, tier, now, ScanMode::Scheduled)
                        .await
                }
            })
            .buffer_unordered(self.settings.max_concurrent_monitors.max(1))
            .collect()
            .await;

        for outcome in &outcomes {
            report.tally(outcome);
        }

        tracing::info!(
            platform = %platform,
            cycle_id = %cycle_id,
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            new_results = report.new_results,
            enrichment_events = report.enrichment_events,
            "ingest: cycle complete"
        );

        Ok(report)
    }

    /// Scan every enabled platform of a monitor whose manual-scan claim the
    /// caller already holds, then release the claim.
    pub async fn run_manual_scan(
        &self,
        monitor: &MonitorRecord,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> CycleReport {
        let cycle_id = CycleId::manual(monitor.id, now);
        let mut report = CycleReport {
            cycle_id: cycle_id.to_string(),
            monitors_total: 1,
            ..CycleReport::default()
        };

        for &platform in &monitor.platforms {
            if let Err(e) = self.connector.ensure_configured(platform) {
                tracing::warn!(platform = %platform, monitor_id = monitor.id, error = %e, "ingest: manual scan skipping platform");
                report.tally(&MonitorOutcome::Skipped(SkipReason::ConnectorNotConfigured));
                continue;
            }
            let outcome = match gate_monitor(monitor, tier, platform, now, ScanMode::Manual) {
                Ok(()) => {
                    self.scan_monitor(&cycle_id, platform, monitor, tier, now, ScanMode::Manual)
                        .await
                }
                Err(reason) => MonitorOutcome::Skipped(reason),
            };
            report.tally(&outcome);
        }

        if let Err(e) = self.store.release_manual_scan(monitor.id).await {
            tracing::error!(monitor_id = monitor.id, error = %e, "ingest: failed to release manual scan claim");
        }

        tracing::info!(
            monitor_id = monitor.id,
            tenant_id = %monitor.tenant_id,
            new_results = report.new_results,
            failed = report.failed,
            "ingest: manual scan complete"
        );
        report
    }

    /// Scan one monitor on one platform. Never returns an error: failures are
    /// logged and reported as [`MonitorOutcome::Failed`].
    ///
    /// Scheduled scans claim `(monitor, platform)` first and skip with
    /// [`SkipReason::ScanInProgress`] when a live claim exists; a claim left
    /// by a crashed worker goes stale and is taken over.
    pub async fn scan_monitor(
        &self,
        cycle_id: &CycleId,
        platform: Platform,
        monitor: &MonitorRecord,
        tier: Tier,
        now: DateTime<Utc>,
        mode: ScanMode,
    ) -> MonitorOutcome {
        if mode == ScanMode::Scheduled {
            match self.store.claim_scan(monitor.id, platform, now).await {
                Ok(true) => {}
                Ok(false) => return MonitorOutcome::Skipped(SkipReason::ScanInProgress),
                Err(e) => {
                    tracing::error!(monitor_id = monitor.id, error = %e, "ingest: failed to claim scan");
                    return MonitorOutcome::Failed(e.to_string());
                }
            }
        }

        let result = self.run_stages(cycle_id, platform, monitor, tier, now).await;

        if mode == ScanMode::Scheduled {
            if let Err(e) = self.store.release_scan(monitor.id, platform).await {
                tracing::error!(platform = %platform, monitor_id = monitor.id, error = %e, "ingest: failed to release scan claim");
            }
        }

        match result {
            Ok((new_results, enrichment_events)) => MonitorOutcome::Completed {
                new_results,
                enrichment_events,
            },
            Err(e) => {
                let transient = matches!(&e, PipelineError::Connector(c) if !c.is_configuration());
                if transient {
                    tracing::warn!(
                        platform = %platform,
                        monitor_id = monitor.id,
                        tenant_id = %monitor.tenant_id,
                        error = %e,
                        "ingest: fetch failed, retrying next cycle"
                    );
                } else {
                    tracing::error!(
                        platform = %platform,
                        monitor_id = monitor.id,
                        tenant_id = %monitor.tenant_id,
                        error = %e,
                        "ingest: monitor scan failed"
                    );
                }
                MonitorOutcome::Failed(e.to_string())
            }
        }
    }

    async fn run_stages(
        &self,
        cycle_id: &CycleId,
        platform: Platform,
        monitor: &MonitorRecord,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> Result<(usize, usize), PipelineError> {
        let matched = self
            .stages
            .run(StageKey::new(cycle_id, STAGE_FETCH_MATCH, monitor.id), || {
                self.fetch_and_match(platform, monitor, tier)
            })
            .await?
            .output;

        let persisted = self
            .stages
            .run(StageKey::new(cycle_id, STAGE_PERSIST, monitor.id), || {
                self.dedup_and_persist(platform, monitor, tier, &matched, now)
            })
            .await?
            .output;

        let new_results = persisted.inserted_ids.len();
        self.stages
            .run(StageKey::new(cycle_id, STAGE_RECORD_CHECK, monitor.id), || async {
                self.store
                    .record_check(monitor.id, platform, now, new_results)
                    .await?;
                Ok(new_results)
            })
            .await?;

        Ok((new_results, persisted.enrichment_events))
    }

    async fn fetch_and_match(
        &self,
        platform: Platform,
        monitor: &MonitorRecord,
        tier: Tier,
    ) -> Result<Vec<MatchedCandidate>, PipelineError> {
        let keywords = effective_keywords(monitor, tier);
        let request = FetchRequest {
            platform,
            monitor_id: monitor.id,
            keywords: keywords.clone(),
            boolean_query: monitor.boolean_query.clone(),
            company_name: monitor.company_name.clone(),
            target_url: monitor.target_url(platform).map(str::to_string),
        };

        let timeout = self.settings.fetch_timeout;
        let candidates = tokio::time::timeout(timeout, self.connector.fetch(&request))
            .await
            .map_err(|_| ConnectorError::Timeout {
                platform,
                after_secs: timeout.as_secs(),
            })??;

        let matcher = CompiledMonitorMatcher::new(&MonitorMatchConfig {
            keywords,
            ..monitor.match_config()
        });

        let fetched = candidates.len();
        let matched: Vec<MatchedCandidate> = candidates
            .into_iter()
            .filter(|c| !c.source_url.trim().is_empty())
            .filter_map(|item| {
                let verdict = matcher.evaluate(&item.match_content(platform.as_str()));
                let match_type = verdict.match_type?;
                verdict.matches.then(|| MatchedCandidate {
                    item,
                    match_type,
                    matched_terms: verdict.matched_terms,
                })
            })
            .collect();

        tracing::debug!(
            platform = %platform,
            monitor_id = monitor.id,
            fetched,
            matched = matched.len(),
            "ingest: candidates matched"
        );
        Ok(matched)
    }

    async fn dedup_and_persist(
        &self,
        platform: Platform,
        monitor: &MonitorRecord,
        tier: Tier,
        matched: &[MatchedCandidate],
        now: DateTime<Utc>,
    ) -> Result<PersistOutcome, PipelineError> {
        let mut seen = HashSet::new();
        let unique: Vec<&MatchedCandidate> = matched
            .iter()
            .filter(|m| seen.insert(m.item.source_url.clone()))
            .collect();
        if unique.is_empty() {
            return Ok(PersistOutcome::default());
        }

        let urls: Vec<String> = unique.iter().map(|m| m.item.source_url.clone()).collect();
        let existing = self.store.existing_source_urls(monitor.id, &urls).await?;

        let fresh: Vec<NewResult> = unique
            .into_iter()
            .filter(|m| !existing.contains(&m.item.source_url))
            .map(|m| new_result(monitor.id, platform, m, now))
            .collect();
        if fresh.is_empty() {
            return Ok(PersistOutcome::default());
        }

        let batch_threshold = self.settings.batch_threshold;
        let plan = |outcome: &PersistOutcome| {
            plan_analysis(&DispatchInput {
                monitor_id: monitor.id,
                tenant_id: &monitor.tenant_id,
                platform,
                tier,
                new_result_ids: &outcome.inserted_ids,
                tenant_results_before: outcome.tenant_results_before,
                batch_threshold,
            })
        };
        let outcome = self
            .store
            .persist_results(&monitor.tenant_id, &fresh, &plan)
            .await?;
        tracing::debug!(
            platform = %platform,
            monitor_id = monitor.id,
            inserted = outcome.inserted_ids.len(),
            enrichment_events = outcome.enrichment_events,
            "ingest: results persisted"
        );
        Ok(outcome)
    }
}

fn new_result(
    monitor_id: i64,
    platform: Platform,
    matched: &MatchedCandidate,
    now: DateTime<Utc>,
) -> NewResult {
    let item = &matched.item;
    let score = score_lead(
        &LeadScoreInput {
            title: &item.title,
            body: &item.body,
            engagement: item.engagement_metric,
            posted_at: item.posted_at,
            author_karma: item.author_karma(),
            author_account_age_days: item.author_account_age_days(),
            category: None,
        },
        now,
    );
    NewResult {
        monitor_id,
        platform: platform.as_str().to_string(),
        source_url: item.source_url.clone(),
        title: item.title.clone(),
        body: item.body.clone(),
        author: item.author.clone(),
        posted_at: item.posted_at,
        engagement_metric: item.engagement_metric,
        platform_metadata: item.platform_metadata.clone(),
        match_type: matched.match_type.as_str().to_string(),
        matched_terms: matched.matched_terms.clone(),
        lead_score: score.rounded_total(),
    }
}

/// Count gate reasons for a batch; used by the CLI dry-run output.
#[must_use]
pub fn gate_summary(
    monitors: &[MonitorRecord],
    tiers: &HashMap<String, Tier>,
    platform: Platform,
    now: DateTime<Utc>,
) -> HashMap<Option<SkipReason>, usize> {
    let mut summary = HashMap::new();
    for monitor in monitors {
        let tier = tiers.get(&monitor.tenant_id).copied().unwrap_or(Tier::Free);
        let key = gate_monitor(monitor, tier, platform, now, ScanMode::Scheduled).err();
        *summary.entry(key).or_insert(0) += 1;
    }
    summary
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{Duration as ChronoDuration, TimeZone};
    use leadscout_core::ActiveHours;

    use super::*;

    fn now() -> DateTime<Utc> {
        // A Monday.
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn monitor() -> MonitorRecord {
        MonitorRecord {
            id: 1,
            tenant_id: "t1".into(),
            name: "m".into(),
            keywords: vec!["crm".into()],
            boolean_query: None,
            company_name: None,
            platforms: vec![Platform::Reddit],
            target_urls: BTreeMap::new(),
            active_hours: None,
            is_active: true,
            last_checked_at: None,
            last_manual_scan_at: None,
        }
    }

    #[test]
    fn gate_blocks_platform_outside_plan() {
        let result = gate_monitor(&monitor(), Tier::Free, Platform::G2, now(), ScanMode::Scheduled);
        assert_eq!(result, Err(SkipReason::PlatformNotAllowed));
    }

    #[test]
    fn gate_blocks_until_refresh_delay_elapses() {
        let mut m = monitor();
        m.last_checked_at = Some(now() - ChronoDuration::hours(2));
        assert_eq!(
            gate_monitor(&m, Tier::Free, Platform::Reddit, now(), ScanMode::Scheduled),
            Err(SkipReason::RefreshNotDue)
        );
        assert_eq!(
            gate_monitor(&m, Tier::Free, Platform::Reddit, now(), ScanMode::Manual),
            Ok(())
        );
        m.last_checked_at = Some(now() - ChronoDuration::hours(24));
        assert_eq!(
            gate_monitor(&m, Tier::Free, Platform::Reddit, now(), ScanMode::Scheduled),
            Ok(())
        );
    }

    #[test]
    fn gate_honours_active_hours() {
        let mut m = monitor();
        m.active_hours = Some(ActiveHours {
            start_hour: 22,
            end_hour: 6,
            weekdays: vec![],
        });
        assert_eq!(
            gate_monitor(&m, Tier::Pro, Platform::Reddit, now(), ScanMode::Scheduled),
            Err(SkipReason::NotInActiveHours)
        );
    }

    #[test]
    fn gate_requires_target_url_for_review_platforms() {
        let mut m = monitor();
        m.platforms = vec![Platform::G2];
        assert_eq!(
            gate_monitor(&m, Tier::Pro, Platform::G2, now(), ScanMode::Scheduled),
            Err(SkipReason::MissingTargetUrl)
        );
        m.target_urls.insert(Platform::G2, "https://g2.example/p/acme".into());
        assert_eq!(
            gate_monitor(&m, Tier::Pro, Platform::G2, now(), ScanMode::Scheduled),
            Ok(())
        );
    }

    #[test]
    fn gate_rejects_inactive() {
        let mut m = monitor();
        m.is_active = false;
        assert_eq!(
            gate_monitor(&m, Tier::Pro, Platform::Reddit, now(), ScanMode::Scheduled),
            Err(SkipReason::Inactive)
        );
    }

    #[test]
    fn downgraded_monitor_uses_first_keywords_only() {
        let mut m = monitor();
        m.keywords = vec!["a".into(), " ".into(), "b".into(), "c".into(), "d".into()];
        assert_eq!(effective_keywords(&m, Tier::Free), vec!["a", "b", "c"]);
        assert_eq!(effective_keywords(&m, Tier::Pro).len(), 4);
    }

    #[test]
    fn batch_delays_start_at_zero() {
        let delays = batch_delays(10, Duration::from_secs(300), 0.1);
        assert_eq!(delays.len(), 10);
        assert_eq!(delays[0], Duration::ZERO);
        assert!(batch_delays(3, Duration::from_secs(300), 0.1)
            .iter()
            .all(Duration::is_zero));
    }

    #[test]
    fn gate_summary_counts_reasons() {
        let mut stale = monitor();
        stale.id = 2;
        stale.last_checked_at = Some(now());
        let tiers = HashMap::from([("t1".to_string(), Tier::Starter)]);
        let summary = gate_summary(&[monitor(), stale], &tiers, Platform::Reddit, now());
        assert_eq!(summary.get(&None), Some(&1));
        assert_eq!(summary.get(&Some(SkipReason::RefreshNotDue)), Some(&1));
    }
}
