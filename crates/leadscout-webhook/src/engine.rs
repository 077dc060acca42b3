//! Signed POST delivery with a persisted retry ladder.
//!
//! Attempts never sleep in-process: a failed attempt is stored as `retrying`
//! with its next retry time, and [`WebhookEngine::sweep_due`] picks it up
//! from the scheduler.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use leadscout_core::{plan_for, Tier};
use reqwest::Client;
use serde::Serialize;

use crate::format::{detect_target, render, Notification};
use crate::signature::{sign, SIGNATURE_HEADER};
use crate::state::{AttemptResult, DeliveryState, DeliveryStatus};
use crate::store::{Delivery, DeliveryStore, WebhookTarget};
use crate::WebhookError;

/// Longest error text kept on a delivery row.
const MAX_ERROR_LEN: usize = 500;

/// Shortest time a swept delivery stays claimed; longer request timeouts
/// stretch it to twice the timeout.
const MIN_SWEEP_LEASE_SECS: u64 = 300;
const MAX_SWEEP_LEASE_SECS: u64 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub delivery_id: i64,
    pub webhook_id: i64,
    pub status: DeliveryStatus,
    pub attempt_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// The tenant's tier has no webhook access; nothing was sent or stored.
    NotEligible { tier: Tier },
    NoTargets,
    /// `failed_webhooks` lists targets whose delivery could not be created
    /// or whose attempt could not be stored; the other targets were still
    /// attempted.
    Dispatched {
        deliveries: Vec<DeliveryReport>,
        failed_webhooks: Vec<i64>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub retrying: usize,
    pub failed: usize,
}

pub struct WebhookEngine<S> {
    client: Client,
    store: Arc<S>,
    max_attempts: u32,
    sweep_lease: chrono::Duration,
}

impl<S: DeliveryStore> WebhookEngine<S> {
    /// # Errors
    ///
    /// Returns [`WebhookError::Request`] if the HTTP client cannot be built.
    pub fn new(
        store: Arc<S>,
        timeout_secs: u64,
        user_agent: &str,
        max_attempts: u32,
    ) -> Result<Self, WebhookError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .user_agent(user_agent)
            .build()?;
        let lease_secs = MIN_SWEEP_LEASE_SECS
            .max(timeout_secs.saturating_mul(2))
            .min(MAX_SWEEP_LEASE_SECS);
        Ok(Self {
            client,
            store,
            max_attempts: max_attempts.max(1),
            sweep_lease: chrono::Duration::seconds(
                i64::try_from(lease_secs).unwrap_or(86_400),
            ),
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Create and attempt one delivery per subscribed webhook.
    ///
    /// A store failure for one target is logged and reported in
    /// `failed_webhooks`; the remaining targets are still attempted.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError`] if the targets cannot be loaded or the
    /// notification cannot be serialized. Endpoint failures are recorded on
    /// the delivery, not returned.
    pub async fn dispatch(
        &self,
        tier: Tier,
        notification: &Notification,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, WebhookError> {
        if !plan_for(tier).webhooks {
            tracing::info!(
                tenant_id = %notification.tenant_id,
                tier = %tier,
                event = %notification.event,
                "webhook: tenant not eligible, dropping event"
            );
            return Ok(DispatchOutcome::NotEligible { tier });
        }

        let targets = self
            .store
            .active_webhooks(&notification.tenant_id, &notification.event)
            .await?;
        if targets.is_empty() {
            return Ok(DispatchOutcome::NoTargets);
        }

        let envelope = serde_json::to_value(notification)?;
        let mut deliveries = Vec::with_capacity(targets.len());
        let mut failed_webhooks = Vec::new();
        for target in &targets {
            let delivery = match self
                .store
                .create_delivery(target.id, &notification.event, &envelope, self.max_attempts)
                .await
            {
                Ok(delivery) => delivery,
                Err(e) => {
                    tracing::error!(
                        webhook_id = target.id,
                        tenant_id = %target.tenant_id,
                        error = %e,
                        "webhook: could not create delivery"
                    );
                    failed_webhooks.push(target.id);
                    continue;
                }
            };
            match self.attempt(&delivery, target, now).await {
                Ok(state) => deliveries.push(DeliveryReport {
                    delivery_id: delivery.id,
                    webhook_id: target.id,
                    status: state.status,
                    attempt_count: state.attempt_count,
                }),
                Err(e) => {
                    tracing::error!(
                        delivery_id = delivery.id,
                        webhook_id = target.id,
                        error = %e,
                        "webhook: attempt not recorded"
                    );
                    failed_webhooks.push(target.id);
                }
            }
        }

        Ok(DispatchOutcome::Dispatched {
            deliveries,
            failed_webhooks,
        })
    }

    /// POST once and persist the resulting state.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError`] if the body cannot be serialized or the new
    /// state cannot be stored.
    pub async fn attempt(
        &self,
        delivery: &Delivery,
        target: &WebhookTarget,
        now: DateTime<Utc>,
    ) -> Result<DeliveryState, WebhookError> {
        let body = serde_json::to_vec(&render(detect_target(&target.url), &delivery.payload))?;
        let signature = sign(&target.secret, &body);

        let result = match self
            .client
            .post(&target.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => AttemptResult::Delivered {
                status_code: response.status().as_u16(),
            },
            Ok(response) => {
                let code = response.status().as_u16();
                AttemptResult::Failed {
                    status_code: Some(code),
                    error: WebhookError::HttpStatus(code).to_string(),
                }
            }
            Err(e) => AttemptResult::Failed {
                status_code: None,
                error: truncate(&WebhookError::Request(e).to_string()),
            },
        };

        let state = delivery.state.next(&result, now);
        self.store.record_attempt(delivery.id, &state).await?;

        match state.status {
            DeliveryStatus::Success => tracing::debug!(
                delivery_id = delivery.id,
                webhook_id = target.id,
                attempt = state.attempt_count,
                "webhook: delivered"
            ),
            DeliveryStatus::Retrying => tracing::warn!(
                delivery_id = delivery.id,
                webhook_id = target.id,
                attempt = state.attempt_count,
                next_retry_at = ?state.next_retry_at,
                error = state.last_error.as_deref().unwrap_or_default(),
                "webhook: attempt failed, will retry"
            ),
            DeliveryStatus::Failed => tracing::error!(
                delivery_id = delivery.id,
                webhook_id = target.id,
                tenant_id = %target.tenant_id,
                attempt = state.attempt_count,
                error = state.last_error.as_deref().unwrap_or_default(),
                "webhook: delivery failed after max attempts"
            ),
            DeliveryStatus::Pending => {}
        }

        Ok(state)
    }

    /// Claim and re-attempt every `retrying` delivery whose retry time has
    /// passed. Overlapping sweeps split the due rows between them rather
    /// than posting the same delivery twice.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError`] if the due list cannot be claimed. A failure
    /// storing one delivery's state is logged and the sweep continues; that
    /// delivery comes due again when its claim lapses.
    pub async fn sweep_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<SweepReport, WebhookError> {
        let due = self
            .store
            .claim_due(now, now + self.sweep_lease, limit)
            .await?;
        let mut report = SweepReport::default();

        for (delivery, target) in &due {
            report.attempted += 1;
            match self.attempt(delivery, target, now).await {
                Ok(state) => match state.status {
                    DeliveryStatus::Success => report.succeeded += 1,
                    DeliveryStatus::Retrying => report.retrying += 1,
                    DeliveryStatus::Failed => report.failed += 1,
                    DeliveryStatus::Pending => {}
                },
                Err(e) => {
                    tracing::error!(delivery_id = delivery.id, error = %e, "webhook: sweep attempt not recorded");
                }
            }
        }

        if report.attempted > 0 {
            tracing::info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                retrying = report.retrying,
                failed = report.failed,
                "webhook: sweep complete"
            );
        }
        Ok(report)
    }

    /// Delete deliveries older than `retention_days`, whatever their status.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError`] on store failure.
    pub async fn purge(&self, now: DateTime<Utc>, retention_days: u32) -> Result<u64, WebhookError> {
        let cutoff = now - chrono::Duration::days(i64::from(retention_days));
        let purged = self.store.purge_before(cutoff).await?;
        tracing::info!(purged, cutoff = %cutoff, "webhook: purged old deliveries");
        Ok(purged)
    }
}

fn truncate(message: &str) -> String {
    match message.char_indices().nth(MAX_ERROR_LEN) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}
