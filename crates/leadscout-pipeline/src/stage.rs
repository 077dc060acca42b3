//! Named, memoized pipeline stages.
//!
//! A stage's serialized output is stored under `(cycle_id, stage, entity_id)`.
//! Running a stage whose output is already stored returns the stored output
//! without executing the stage body, so a cycle interrupted part-way through
//! can be re-run safely inside the same scheduling slot.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadscout_core::Platform;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::PipelineError;

/// Identifies one platform scan cycle. Derived from the scheduling slot, so
/// every trigger within the same slot shares an id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CycleId(String);

impl CycleId {
    #[must_use]
    pub fn for_slot(platform: Platform, now: DateTime<Utc>, slot_minutes: u32) -> Self {
        let slot_secs = i64::from(slot_minutes.max(1)) * 60;
        let slot = now.timestamp().div_euclid(slot_secs);
        Self(format!("{platform}:{slot}"))
    }

    /// A one-off cycle id for a manual scan; never collides with slot ids.
    #[must_use]
    pub fn manual(monitor_id: i64, now: DateTime<Utc>) -> Self {
        Self(format!("manual:{monitor_id}:{}", now.timestamp_millis()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CycleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StageKey {
    pub cycle_id: String,
    pub stage: &'static str,
    pub entity_id: String,
}

impl StageKey {
    #[must_use]
    pub fn new(cycle_id: &CycleId, stage: &'static str, entity_id: impl ToString) -> Self {
        Self {
            cycle_id: cycle_id.as_str().to_string(),
            stage,
            entity_id: entity_id.to_string(),
        }
    }
}

#[async_trait]
pub trait StageStore: Send + Sync {
    async fn load(&self, key: &StageKey) -> Result<Option<serde_json::Value>, PipelineError>;

    /// Store an output. Implementations keep the first write for a key.
    async fn save(&self, key: &StageKey, output: serde_json::Value) -> Result<(), PipelineError>;
}

#[async_trait]
impl<T: StageStore> StageStore for Arc<T> {
    async fn load(&self, key: &StageKey) -> Result<Option<serde_json::Value>, PipelineError> {
        (**self).load(key).await
    }

    async fn save(&self, key: &StageKey, output: serde_json::Value) -> Result<(), PipelineError> {
        (**self).save(key, output).await
    }
}

/// Result of [`StageRunner::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRun<T> {
    pub output: T,
    /// True when the output came from the memo store and the body was skipped.
    pub replayed: bool,
}

pub struct StageRunner<S> {
    store: S,
}

impl<S: StageStore> StageRunner<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run `body` unless an output for `key` is already stored.
    ///
    /// A failing body stores nothing, so the stage runs again next time.
    ///
    /// # Errors
    ///
    /// Propagates the body's error, store errors, and
    /// [`PipelineError::StageCodec`] when a stored output no longer decodes.
    pub async fn run<T, F, Fut>(&self, key: StageKey, body: F) -> Result<StageRun<T>, PipelineError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, PipelineError>> + Send,
    {
        if let Some(stored) = self.store.load(&key).await? {
            let output = serde_json::from_value(stored).map_err(|source| {
                PipelineError::StageCodec {
                    stage: key.stage.to_string(),
                    source,
                }
            })?;
            tracing::debug!(
                cycle_id = %key.cycle_id,
                stage = key.stage,
                entity_id = %key.entity_id,
                "stage: replaying memoized output"
            );
            return Ok(StageRun {
                output,
                replayed: true,
            });
        }

        let output = body().await?;
        let encoded = serde_json::to_value(&output).map_err(|source| PipelineError::StageCodec {
            stage: key.stage.to_string(),
            source,
        })?;
        self.store.save(&key, encoded).await?;

        Ok(StageRun {
            output,
            replayed: false,
        })
    }
}
