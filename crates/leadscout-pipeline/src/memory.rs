//! In-process stores. Used by the CLI dry-run and by tests; state lives in a
//! mutex and is lost on drop.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadscout_core::{scan_claim_is_live, Platform, Tier};
use leadscout_db::{ManualClaim, NewResult, PersistOutcome};

use crate::dispatch::EnrichmentEvent;
use crate::stage::{StageKey, StageStore};
use crate::store::{MonitorRecord, PipelineStore};
use crate::PipelineError;

/// A persisted result with its assigned id.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResult {
    pub id: i64,
    pub tenant_id: String,
    pub result: NewResult,
}

#[derive(Debug, Default)]
struct MemoryState {
    monitors: BTreeMap<i64, MonitorRecord>,
    platform_checks: HashMap<(i64, Platform), DateTime<Utc>>,
    tiers: HashMap<String, Tier>,
    results: Vec<StoredResult>,
    usage: HashMap<String, i64>,
    events: Vec<EnrichmentEvent>,
    manual_scans: Vec<(String, DateTime<Utc>)>,
    platform_claims: HashMap<(i64, Platform), DateTime<Utc>>,
    manual_claims: HashMap<i64, DateTime<Utc>>,
    fail_persist: bool,
    fail_enrichment: bool,
}

impl MemoryState {
    fn manual_claim_live(&self, monitor_id: i64, now: DateTime<Utc>) -> bool {
        self.manual_claims
            .get(&monitor_id)
            .is_some_and(|at| scan_claim_is_live(*at, now))
    }

    fn platform_claim_live(&self, monitor_id: i64, now: DateTime<Utc>) -> bool {
        self.platform_claims
            .iter()
            .any(|((id, _), at)| *id == monitor_id && scan_claim_is_live(*at, now))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_monitor(&self, monitor: MonitorRecord) {
        self.lock().monitors.insert(monitor.id, monitor);
    }

    pub fn set_tier(&self, tenant_id: &str, tier: Tier) {
        self.lock().tiers.insert(tenant_id.to_string(), tier);
    }

    /// Make every subsequent persist fail until reset.
    pub fn set_fail_persist(&self, fail: bool) {
        self.lock().fail_persist = fail;
    }

    /// Make the outbox write inside a persist fail, which rolls back the
    /// whole persist.
    pub fn set_fail_enrichment(&self, fail: bool) {
        self.lock().fail_enrichment = fail;
    }

    /// Leave a platform claim behind as a worker that died mid-scan would.
    pub fn hold_platform_claim(
        &self,
        monitor_id: i64,
        platform: Platform,
        started_at: DateTime<Utc>,
    ) {
        self.lock()
            .platform_claims
            .insert((monitor_id, platform), started_at);
    }

    /// Leave a manual claim behind as a worker that died mid-scan would.
    pub fn hold_manual_claim(&self, monitor_id: i64, started_at: DateTime<Utc>) {
        self.lock().manual_claims.insert(monitor_id, started_at);
    }

    /// Whether any claim, live or stale, is still held on the monitor.
    #[must_use]
    pub fn is_claimed(&self, monitor_id: i64) -> bool {
        let state = self.lock();
        state.manual_claims.contains_key(&monitor_id)
            || state.platform_claims.keys().any(|(id, _)| *id == monitor_id)
    }

    #[must_use]
    pub fn results(&self) -> Vec<StoredResult> {
        self.lock().results.clone()
    }

    #[must_use]
    pub fn usage(&self, tenant_id: &str) -> i64 {
        self.lock().usage.get(tenant_id).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn events(&self) -> Vec<EnrichmentEvent> {
        self.lock().events.clone()
    }

    #[must_use]
    pub fn snapshot(&self, monitor_id: i64) -> Option<MonitorRecord> {
        self.lock().monitors.get(&monitor_id).cloned()
    }

    #[must_use]
    pub fn platform_check(&self, monitor_id: i64, platform: Platform) -> Option<DateTime<Utc>> {
        self.lock().platform_checks.get(&(monitor_id, platform)).copied()
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn monitors_for_platform(
        &self,
        platform: Platform,
    ) -> Result<Vec<MonitorRecord>, PipelineError> {
        let state = self.lock();
        Ok(state
            .monitors
            .values()
            .filter(|m| m.is_active && m.platforms.contains(&platform))
            .map(|m| MonitorRecord {
                last_checked_at: state.platform_checks.get(&(m.id, platform)).copied(),
                ..m.clone()
            })
            .collect())
    }

    async fn monitor(&self, id: i64) -> Result<Option<MonitorRecord>, PipelineError> {
        Ok(self.snapshot(id))
    }

    async fn tenant_tiers(
        &self,
        tenant_ids: &[String],
    ) -> Result<HashMap<String, Tier>, PipelineError> {
        let state = self.lock();
        Ok(tenant_ids
            .iter()
            .map(|t| (t.clone(), state.tiers.get(t).copied().unwrap_or(Tier::Free)))
            .collect())
    }

    async fn tenant_tier(&self, tenant_id: &str) -> Result<Tier, PipelineError> {
        Ok(self.lock().tiers.get(tenant_id).copied().unwrap_or(Tier::Free))
    }

    async fn claim_scan(
        &self,
        monitor_id: i64,
        platform: Platform,
        now: DateTime<Utc>,
    ) -> Result<bool, PipelineError> {
        let mut state = self.lock();
        let active = state.monitors.get(&monitor_id).is_some_and(|m| m.is_active);
        let platform_busy = state
            .platform_claims
            .get(&(monitor_id, platform))
            .is_some_and(|at| scan_claim_is_live(*at, now));
        if !active || platform_busy || state.manual_claim_live(monitor_id, now) {
            return Ok(false);
        }
        state.platform_claims.insert((monitor_id, platform), now);
        Ok(true)
    }

    async fn release_scan(&self, monitor_id: i64, platform: Platform) -> Result<(), PipelineError> {
        self.lock().platform_claims.remove(&(monitor_id, platform));
        Ok(())
    }

    async fn claim_manual_scan(
        &self,
        monitor_id: i64,
        tenant_id: &str,
        now: DateTime<Utc>,
        day_start: DateTime<Utc>,
        daily_cap: u32,
    ) -> Result<ManualClaim, PipelineError> {
        let mut state = self.lock();
        let owned = state
            .monitors
            .get(&monitor_id)
            .is_some_and(|m| m.is_active && m.tenant_id == tenant_id);
        if !owned {
            return Ok(ManualClaim::Missing);
        }
        if state.manual_claim_live(monitor_id, now) || state.platform_claim_live(monitor_id, now) {
            return Ok(ManualClaim::InProgress);
        }

        let used = state
            .manual_scans
            .iter()
            .filter(|(t, at)| t == tenant_id && *at >= day_start)
            .count();
        let used = u32::try_from(used).unwrap_or(u32::MAX);
        if used >= daily_cap {
            return Ok(ManualClaim::DailyCap);
        }

        state.manual_claims.insert(monitor_id, now);
        state.manual_scans.push((tenant_id.to_string(), now));
        if let Some(m) = state.monitors.get_mut(&monitor_id) {
            m.last_manual_scan_at = Some(now);
        }
        Ok(ManualClaim::Claimed {
            scans_today: used.saturating_add(1),
        })
    }

    async fn release_manual_scan(&self, monitor_id: i64) -> Result<(), PipelineError> {
        self.lock().manual_claims.remove(&monitor_id);
        Ok(())
    }

    async fn existing_source_urls(
        &self,
        monitor_id: i64,
        urls: &[String],
    ) -> Result<HashSet<String>, PipelineError> {
        let wanted: HashSet<&String> = urls.iter().collect();
        Ok(self
            .lock()
            .results
            .iter()
            .filter(|r| r.result.monitor_id == monitor_id && wanted.contains(&r.result.source_url))
            .map(|r| r.result.source_url.clone())
            .collect())
    }

    async fn persist_results(
        &self,
        tenant_id: &str,
        results: &[NewResult],
        plan: &(dyn for<'o> Fn(&'o PersistOutcome) -> Vec<EnrichmentEvent> + Send + Sync),
    ) -> Result<PersistOutcome, PipelineError> {
        let mut state = self.lock();
        if state.fail_persist {
            return Err(PipelineError::Store("persist disabled".to_string()));
        }

        let tenant_results_before =
            i64::try_from(state.results.iter().filter(|r| r.tenant_id == tenant_id).count())
                .unwrap_or(i64::MAX);

        // Staged first and applied only once the outbox write succeeds.
        let mut staged: Vec<StoredResult> = Vec::new();
        for result in results {
            let duplicate = state.results.iter().chain(&staged).any(|r| {
                r.result.monitor_id == result.monitor_id && r.result.source_url == result.source_url
            });
            if duplicate {
                continue;
            }
            let id = i64::try_from(state.results.len() + staged.len()).unwrap_or(i64::MAX) + 1;
            staged.push(StoredResult {
                id,
                tenant_id: tenant_id.to_string(),
                result: result.clone(),
            });
        }

        let mut outcome = PersistOutcome {
            inserted_ids: staged.iter().map(|r| r.id).collect(),
            tenant_results_before,
            enrichment_events: 0,
        };
        let events = plan(&outcome);
        if state.fail_enrichment {
            return Err(PipelineError::Store("enrichment outbox unavailable".to_string()));
        }

        if !staged.is_empty() {
            let added = i64::try_from(staged.len()).unwrap_or(i64::MAX);
            *state.usage.entry(tenant_id.to_string()).or_insert(0) += added;
        }
        state.results.extend(staged);
        outcome.enrichment_events = events.len();
        state.events.extend(events);
        Ok(outcome)
    }

    async fn record_check(
        &self,
        monitor_id: i64,
        platform: Platform,
        checked_at: DateTime<Utc>,
        _new_matches: usize,
    ) -> Result<(), PipelineError> {
        let mut state = self.lock();
        state.platform_checks.insert((monitor_id, platform), checked_at);
        if let Some(m) = state.monitors.get_mut(&monitor_id) {
            m.last_checked_at = Some(checked_at);
        }
        Ok(())
    }
}

/// Stage memo store that keeps the first write for each key.
#[derive(Debug, Default)]
pub struct MemoryStageStore {
    memos: Mutex<HashMap<StageKey, serde_json::Value>>,
}

impl MemoryStageStore {
    #[must_use]
    pub fn len(&self) -> usize {
        self.memos.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StageStore for MemoryStageStore {
    async fn load(&self, key: &StageKey) -> Result<Option<serde_json::Value>, PipelineError> {
        Ok(self
            .memos
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    async fn save(&self, key: &StageKey, output: serde_json::Value) -> Result<(), PipelineError> {
        self.memos
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_insert(output);
        Ok(())
    }
}
