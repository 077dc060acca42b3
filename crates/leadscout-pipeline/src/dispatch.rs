//! Analysis dispatch: one enrichment event per new result, or a single
//! batched event once a monitor's new-result count exceeds the threshold.

use leadscout_core::{plan_for, Platform, Tier};
use leadscout_db::NewEnrichmentEvent;
use serde::{Deserialize, Serialize};

/// Documented batch threshold. Inclusive on the individual side.
pub const DEFAULT_BATCH_THRESHOLD: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnrichmentEvent {
    Single {
        result_id: i64,
        tenant_id: String,
    },
    Batch {
        monitor_id: i64,
        tenant_id: String,
        platform: Platform,
        result_ids: Vec<i64>,
        total_count: usize,
    },
}

impl EnrichmentEvent {
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        match self {
            EnrichmentEvent::Single { tenant_id, .. } | EnrichmentEvent::Batch { tenant_id, .. } => {
                tenant_id
            }
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            EnrichmentEvent::Single { .. } => "single",
            EnrichmentEvent::Batch { .. } => "batch",
        }
    }

    /// Outbox row for this event.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; cannot happen for these variants in
    /// practice.
    pub fn to_outbox(&self) -> Result<NewEnrichmentEvent, serde_json::Error> {
        Ok(NewEnrichmentEvent {
            tenant_id: self.tenant_id().to_string(),
            kind: self.kind(),
            payload: serde_json::to_value(self)?,
        })
    }
}

/// Input to [`plan_analysis`]: one monitor's freshly persisted results.
#[derive(Debug, Clone, Copy)]
pub struct DispatchInput<'a> {
    pub monitor_id: i64,
    pub tenant_id: &'a str,
    pub platform: Platform,
    pub tier: Tier,
    /// Ids actually inserted by the persist step, in insertion order.
    pub new_result_ids: &'a [i64],
    /// The tenant's lifetime result count before this persist step.
    pub tenant_results_before: i64,
    pub batch_threshold: usize,
}

/// Decide which enrichment events to emit for one monitor's new results.
///
/// Tiers without AI analysis only get their first-ever result enriched;
/// every later result is stored unenriched.
#[must_use]
pub fn plan_analysis(input: &DispatchInput<'_>) -> Vec<EnrichmentEvent> {
    let ids = input.new_result_ids;
    if ids.is_empty() {
        return Vec::new();
    }

    if !plan_for(input.tier).ai_analysis {
        if input.tenant_results_before == 0 {
            return vec![EnrichmentEvent::Single {
                result_id: ids[0],
                tenant_id: input.tenant_id.to_string(),
            }];
        }
        return Vec::new();
    }

    if ids.len() <= input.batch_threshold {
        return ids
            .iter()
            .map(|&result_id| EnrichmentEvent::Single {
                result_id,
                tenant_id: input.tenant_id.to_string(),
            })
            .collect();
    }

    vec![EnrichmentEvent::Batch {
        monitor_id: input.monitor_id,
        tenant_id: input.tenant_id.to_string(),
        platform: input.platform,
        result_ids: ids.to_vec(),
        total_count: ids.len(),
    }]
}
