//! Postgres-backed stores over `leadscout-db`.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadscout_core::{Platform, Tier};
use leadscout_db::{ManualClaim, NewResult, PersistOutcome};
use sqlx::PgPool;

use crate::dispatch::EnrichmentEvent;
use crate::stage::{StageKey, StageStore};
use crate::store::{MonitorRecord, PipelineStore};
use crate::PipelineError;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PipelineStore for PgStore {
    async fn monitors_for_platform(
        &self,
        platform: Platform,
    ) -> Result<Vec<MonitorRecord>, PipelineError> {
        let rows = leadscout_db::list_active_monitors_for_platform(&self.pool, platform.as_str())
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| MonitorRecord {
                last_checked_at: row.platform_last_checked_at,
                ..MonitorRecord::from(row.monitor)
            })
            .collect())
    }

    async fn monitor(&self, id: i64) -> Result<Option<MonitorRecord>, PipelineError> {
        Ok(leadscout_db::get_monitor(&self.pool, id)
            .await?
            .map(MonitorRecord::from))
    }

    async fn tenant_tiers(
        &self,
        tenant_ids: &[String],
    ) -> Result<HashMap<String, Tier>, PipelineError> {
        let raw = leadscout_db::list_tenant_tiers(&self.pool, tenant_ids).await?;
        Ok(tenant_ids
            .iter()
            .map(|t| (t.clone(), Tier::from_billing(raw.get(t).map(String::as_str))))
            .collect())
    }

    async fn tenant_tier(&self, tenant_id: &str) -> Result<Tier, PipelineError> {
        let raw = leadscout_db::get_tenant_tier(&self.pool, tenant_id).await?;
        Ok(Tier::from_billing(raw.as_deref()))
    }

    async fn claim_scan(
        &self,
        monitor_id: i64,
        platform: Platform,
        now: DateTime<Utc>,
    ) -> Result<bool, PipelineError> {
        Ok(leadscout_db::claim_platform_scan(&self.pool, monitor_id, platform.as_str(), now).await?)
    }

    async fn release_scan(&self, monitor_id: i64, platform: Platform) -> Result<(), PipelineError> {
        Ok(leadscout_db::release_platform_scan(&self.pool, monitor_id, platform.as_str()).await?)
    }

    async fn claim_manual_scan(
        &self,
        monitor_id: i64,
        tenant_id: &str,
        now: DateTime<Utc>,
        day_start: DateTime<Utc>,
        daily_cap: u32,
    ) -> Result<ManualClaim, PipelineError> {
        Ok(leadscout_db::claim_manual_scan(
            &self.pool, monitor_id, tenant_id, now, day_start, daily_cap,
        )
        .await?)
    }

    async fn release_manual_scan(&self, monitor_id: i64) -> Result<(), PipelineError> {
        Ok(leadscout_db::release_manual_scan(&self.pool, monitor_id).await?)
    }

    async fn existing_source_urls(
        &self,
        monitor_id: i64,
        urls: &[String],
    ) -> Result<HashSet<String>, PipelineError> {
        Ok(leadscout_db::existing_source_urls(&self.pool, monitor_id, urls).await?)
    }

    async fn persist_results(
        &self,
        tenant_id: &str,
        results: &[NewResult],
        plan: &(dyn for<'o> Fn(&'o PersistOutcome) -> Vec<EnrichmentEvent> + Send + Sync),
    ) -> Result<PersistOutcome, PipelineError> {
        Ok(
            leadscout_db::insert_results_with_usage(&self.pool, tenant_id, results, |outcome| {
                plan(outcome).iter().map(EnrichmentEvent::to_outbox).collect()
            })
            .await?,
        )
    }

    async fn record_check(
        &self,
        monitor_id: i64,
        platform: Platform,
        checked_at: DateTime<Utc>,
        new_matches: usize,
    ) -> Result<(), PipelineError> {
        let new_matches = i32::try_from(new_matches).unwrap_or(i32::MAX);
        Ok(leadscout_db::record_platform_check(
            &self.pool,
            monitor_id,
            platform.as_str(),
            checked_at,
            new_matches,
        )
        .await?)
    }
}

#[derive(Debug, Clone)]
pub struct PgStageStore {
    pool: PgPool,
}

impl PgStageStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StageStore for PgStageStore {
    async fn load(&self, key: &StageKey) -> Result<Option<serde_json::Value>, PipelineError> {
        Ok(
            leadscout_db::get_stage_memo(&self.pool, &key.cycle_id, key.stage, &key.entity_id)
                .await?,
        )
    }

    async fn save(&self, key: &StageKey, output: serde_json::Value) -> Result<(), PipelineError> {
        Ok(leadscout_db::put_stage_memo(
            &self.pool,
            &key.cycle_id,
            key.stage,
            &key.entity_id,
            &output,
        )
        .await?)
    }
}
