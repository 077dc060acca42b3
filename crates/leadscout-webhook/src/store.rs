//! Storage seam for webhooks and deliveries, with Postgres and in-memory
//! implementations.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadscout_db::{DeliveryAttemptUpdate, DeliveryRow, WebhookRow};
use sqlx::PgPool;

use crate::state::{DeliveryState, DeliveryStatus};
use crate::WebhookError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookTarget {
    pub id: i64,
    pub tenant_id: String,
    pub url: String,
    pub secret: String,
    pub events: Vec<String>,
    pub is_active: bool,
}

impl From<WebhookRow> for WebhookTarget {
    fn from(row: WebhookRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            url: row.url,
            secret: row.secret,
            events: row.events,
            is_active: row.is_active,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: i64,
    pub webhook_id: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub state: DeliveryState,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DeliveryRow> for Delivery {
    type Error = WebhookError;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<DeliveryStatus>()
            .map_err(WebhookError::InvalidRow)?;
        let to_u32 = |v: i32, field: &str| {
            u32::try_from(v).map_err(|_| WebhookError::InvalidRow(format!("negative {field}: {v}")))
        };
        Ok(Self {
            id: row.id,
            webhook_id: row.webhook_id,
            event_type: row.event_type,
            payload: row.payload,
            state: DeliveryState {
                status,
                attempt_count: to_u32(row.attempt_count, "attempt_count")?,
                max_attempts: to_u32(row.max_attempts, "max_attempts")?,
                next_retry_at: row.next_retry_at,
                last_status_code: row.last_status_code.and_then(|c| u16::try_from(c).ok()),
                last_error: row.last_error,
                completed_at: row.completed_at,
            },
            created_at: row.created_at,
        })
    }
}

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn active_webhooks(
        &self,
        tenant_id: &str,
        event_type: &str,
    ) -> Result<Vec<WebhookTarget>, WebhookError>;

    async fn create_delivery(
        &self,
        webhook_id: i64,
        event_type: &str,
        payload: &serde_json::Value,
        max_attempts: u32,
    ) -> Result<Delivery, WebhookError>;

    /// Persist the state after an attempt. Terminal deliveries are never
    /// overwritten, and the write is rejected if another attempt already
    /// recorded the same attempt number.
    async fn record_attempt(&self, delivery_id: i64, state: &DeliveryState)
        -> Result<(), WebhookError>;

    /// Claim `retrying` deliveries due at `now`, oldest retry time first.
    /// Claimed deliveries are not due again before `lease_until`, so a
    /// concurrent sweep does not pick them up.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(Delivery, WebhookTarget)>, WebhookError>;

    /// Delete deliveries created before `cutoff`, whatever their status.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, WebhookError>;
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgDeliveryStore {
    pool: PgPool,
}

impl PgDeliveryStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn to_i32(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

#[async_trait]
impl DeliveryStore for PgDeliveryStore {
    async fn active_webhooks(
        &self,
        tenant_id: &str,
        event_type: &str,
    ) -> Result<Vec<WebhookTarget>, WebhookError> {
        let rows = leadscout_db::list_active_webhooks(&self.pool, tenant_id, event_type).await?;
        Ok(rows.into_iter().map(WebhookTarget::from).collect())
    }

    async fn create_delivery(
        &self,
        webhook_id: i64,
        event_type: &str,
        payload: &serde_json::Value,
        max_attempts: u32,
    ) -> Result<Delivery, WebhookError> {
        let row = leadscout_db::create_delivery(
            &self.pool,
            webhook_id,
            event_type,
            payload,
            to_i32(max_attempts),
        )
        .await?;
        Delivery::try_from(row)
    }

    async fn record_attempt(
        &self,
        delivery_id: i64,
        state: &DeliveryState,
    ) -> Result<(), WebhookError> {
        let update = DeliveryAttemptUpdate {
            status: state.status.as_str().to_string(),
            attempt_count: to_i32(state.attempt_count),
            next_retry_at: state.next_retry_at,
            last_status_code: state.last_status_code.map(i32::from),
            last_error: state.last_error.clone(),
            completed_at: state.completed_at,
        };
        Ok(leadscout_db::record_delivery_attempt(&self.pool, delivery_id, &update).await?)
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(Delivery, WebhookTarget)>, WebhookError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows =
            leadscout_db::claim_due_deliveries(&self.pool, now, lease_until, limit).await?;
        rows.into_iter()
            .map(|(delivery, webhook)| Ok((Delivery::try_from(delivery)?, webhook.into())))
            .collect()
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, WebhookError> {
        Ok(leadscout_db::purge_deliveries_before(&self.pool, cutoff).await?)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryState {
    webhooks: BTreeMap<i64, WebhookTarget>,
    deliveries: BTreeMap<i64, Delivery>,
    unavailable_webhooks: BTreeSet<i64>,
}

/// In-process store; `created_at` for new deliveries comes from the
/// injected `now`.
#[derive(Debug)]
pub struct MemoryDeliveryStore {
    state: Mutex<MemoryState>,
    now: Mutex<DateTime<Utc>>,
}

impl MemoryDeliveryStore {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            now: Mutex::new(now),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Timestamp applied to deliveries created from now on.
    pub fn set_now(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    /// Register a webhook subscribed to `new_leads`.
    pub fn add_webhook(&self, tenant_id: &str, url: &str, secret: &str) -> i64 {
        let mut state = self.lock();
        let id = state.webhooks.keys().next_back().map_or(1, |k| k + 1);
        state.webhooks.insert(
            id,
            WebhookTarget {
                id,
                tenant_id: tenant_id.to_string(),
                url: url.to_string(),
                secret: secret.to_string(),
                events: vec![crate::format::EVENT_NEW_LEADS.to_string()],
                is_active: true,
            },
        );
        id
    }

    /// Make `create_delivery` fail for one webhook, as a lost connection
    /// would.
    pub fn set_create_fails(&self, webhook_id: i64) {
        self.lock().unavailable_webhooks.insert(webhook_id);
    }

    #[must_use]
    pub fn delivery(&self, id: i64) -> Option<Delivery> {
        self.lock().deliveries.get(&id).cloned()
    }

    #[must_use]
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.lock().deliveries.values().cloned().collect()
    }
}

#[async_trait]
impl DeliveryStore for MemoryDeliveryStore {
    async fn active_webhooks(
        &self,
        tenant_id: &str,
        event_type: &str,
    ) -> Result<Vec<WebhookTarget>, WebhookError> {
        Ok(self
            .lock()
            .webhooks
            .values()
            .filter(|w| {
                w.is_active && w.tenant_id == tenant_id && w.events.iter().any(|e| e == event_type)
            })
            .cloned()
            .collect())
    }

    async fn create_delivery(
        &self,
        webhook_id: i64,
        event_type: &str,
        payload: &serde_json::Value,
        max_attempts: u32,
    ) -> Result<Delivery, WebhookError> {
        let created_at = *self.now.lock().unwrap_or_else(PoisonError::into_inner);
        let mut state = self.lock();
        if state.unavailable_webhooks.contains(&webhook_id) {
            return Err(WebhookError::Db(leadscout_db::DbError::Sqlx(
                sqlx::Error::PoolTimedOut,
            )));
        }
        let id = state.deliveries.keys().next_back().map_or(1, |k| k + 1);
        let delivery = Delivery {
            id,
            webhook_id,
            event_type: event_type.to_string(),
            payload: payload.clone(),
            state: DeliveryState::pending(max_attempts),
            created_at,
        };
        state.deliveries.insert(id, delivery.clone());
        Ok(delivery)
    }

    async fn record_attempt(
        &self,
        delivery_id: i64,
        new_state: &DeliveryState,
    ) -> Result<(), WebhookError> {
        let mut state = self.lock();
        match state.deliveries.get_mut(&delivery_id) {
            Some(d)
                if !d.state.status.is_terminal()
                    && d.state.attempt_count + 1 == new_state.attempt_count =>
            {
                d.state = new_state.clone();
                Ok(())
            }
            _ => Err(WebhookError::Db(leadscout_db::DbError::NotFound)),
        }
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(Delivery, WebhookTarget)>, WebhookError> {
        let mut state = self.lock();
        let mut due: Vec<(Delivery, WebhookTarget)> = state
            .deliveries
            .values()
            .filter(|d| {
                d.state.status == DeliveryStatus::Retrying
                    && d.state.next_retry_at.is_some_and(|at| at <= now)
            })
            .filter_map(|d| {
                let webhook = state.webhooks.get(&d.webhook_id).filter(|w| w.is_active)?;
                Some((d.clone(), webhook.clone()))
            })
            .collect();
        due.sort_by_key(|(d, _)| (d.state.next_retry_at, d.id));
        due.truncate(limit);
        for (claimed, _) in &mut due {
            claimed.state.next_retry_at = Some(lease_until);
            if let Some(row) = state.deliveries.get_mut(&claimed.id) {
                row.state.next_retry_at = Some(lease_until);
            }
        }
        Ok(due)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, WebhookError> {
        let mut state = self.lock();
        let before = state.deliveries.len();
        state.deliveries.retain(|_, d| d.created_at >= cutoff);
        Ok(u64::try_from(before - state.deliveries.len()).unwrap_or(u64::MAX))
    }
}
