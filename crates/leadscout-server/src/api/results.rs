//! Enrichment worker write-back.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use leadscout_core::{score_lead, ConversationCategory, LeadScoreInput};
use leadscout_db::{EnrichmentUpdate, ResultRow};
use serde::{Deserialize, Serialize};

use crate::middleware::RequestId;

use super::{map_db_error, ApiError, ApiResponse, AppState};

const MAX_SUMMARY_LEN: usize = 4000;

#[derive(Debug, Deserialize)]
pub(in crate::api) struct EnrichmentRequest {
    pub sentiment: Option<String>,
    pub conversation_category: Option<String>,
    pub ai_summary: Option<String>,
}

#[derive(Debug, Serialize)]
pub(in crate::api) struct EnrichmentResponse {
    pub result_id: i64,
    pub lead_score: i32,
    pub conversation_category: Option<String>,
    pub enriched_at: Option<DateTime<Utc>>,
}

fn parse_category(
    rid: &str,
    raw: Option<&str>,
) -> Result<Option<ConversationCategory>, ApiError> {
    raw.map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|c| {
            c.parse::<ConversationCategory>()
                .map_err(|e| ApiError::new(rid, "validation_error", e))
        })
        .transpose()
}

/// Score a stored result with its worker-assigned category. Recency is
/// measured at ingestion time so a late callback does not decay the score.
fn rescore(row: &ResultRow, category: Option<ConversationCategory>) -> i32 {
    let meta = &row.platform_metadata;
    score_lead(
        &LeadScoreInput {
            title: &row.title,
            body: &row.body,
            engagement: row.engagement_metric,
            posted_at: row.posted_at,
            author_karma: meta.get("author_karma").and_then(serde_json::Value::as_i64),
            author_account_age_days: meta
                .get("author_account_age_days")
                .and_then(serde_json::Value::as_i64),
            category,
        },
        row.created_at,
    )
    .rounded_total()
}

/// POST /api/v1/results/{id}/enrichment
///
/// Stores the worker's output and recomputes the score with the category.
/// The scheduler's webhook job folds enriched results into `new_leads`
/// notifications.
pub(in crate::api) async fn apply_enrichment(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(result_id): Path<i64>,
    Json(body): Json<EnrichmentRequest>,
) -> Result<Json<ApiResponse<EnrichmentResponse>>, ApiError> {
    let rid = &req_id.0;
    let category = parse_category(rid, body.conversation_category.as_deref())?;
    let ai_summary = body
        .ai_summary
        .map(|s| s.trim().chars().take(MAX_SUMMARY_LEN).collect::<String>())
        .filter(|s| !s.is_empty());
    let sentiment = body
        .sentiment
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty());

    let row = leadscout_db::get_result(&state.pool, result_id)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?
        .ok_or_else(|| ApiError::new(rid, "not_found", "result not found"))?;

    let update = EnrichmentUpdate {
        sentiment,
        ai_summary,
        conversation_category: category.map(|c| c.as_str().to_owned()),
        lead_score: rescore(&row, category),
    };
    let row = leadscout_db::apply_enrichment(&state.pool, result_id, &update)
        .await
        .map_err(|e| match e {
            leadscout_db::DbError::NotFound => ApiError::new(rid, "not_found", "result not found"),
            other => map_db_error(rid.clone(), &other),
        })?;

    tracing::info!(
        result_id,
        monitor_id = row.monitor_id,
        tenant_id = %row.tenant_id,
        lead_score = row.lead_score,
        "api: enrichment stored"
    );

    let response = EnrichmentResponse {
        result_id: row.id,
        lead_score: row.lead_score,
        conversation_category: row.conversation_category.clone(),
        enriched_at: row.enriched_at,
    };

    Ok(ApiResponse::new(&req_id, response))
}
