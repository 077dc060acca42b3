//! Billing plan-change callback.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use leadscout_core::Tier;
use serde::{Deserialize, Serialize};

use crate::middleware::RequestId;

use super::{map_db_error, ApiError, ApiResponse, AppState};

#[derive(Debug, Deserialize)]
pub(in crate::api) struct SetPlanRequest {
    pub tier: String,
}

#[derive(Debug, Serialize)]
pub(in crate::api) struct PlanResponse {
    pub tenant_id: String,
    pub tier: Tier,
}

/// Strict parse for the callback. Reads elsewhere fall back to free, but an
/// unknown tier arriving here is a billing integration bug worth rejecting.
fn parse_tier(rid: &str, raw: &str) -> Result<Tier, ApiError> {
    let needle = raw.trim().to_ascii_lowercase();
    Tier::ALL
        .into_iter()
        .find(|t| t.as_str() == needle)
        .ok_or_else(|| {
            ApiError::new(
                rid,
                "validation_error",
                format!("unknown tier '{}'", raw.trim()),
            )
        })
}

/// PUT /api/v1/tenants/{tenant_id}/plan
pub(in crate::api) async fn set_plan(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(tenant_id): Path<String>,
    Json(body): Json<SetPlanRequest>,
) -> Result<Json<ApiResponse<PlanResponse>>, ApiError> {
    let rid = &req_id.0;
    let tenant_id = tenant_id.trim().to_owned();
    if tenant_id.is_empty() {
        return Err(ApiError::new(rid, "validation_error", "tenant id is required"));
    }
    let tier = parse_tier(rid, &body.tier)?;

    leadscout_db::upsert_tenant_plan(&state.pool, &tenant_id, tier.as_str())
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    state.tiers.invalidate(&tenant_id);

    tracing::info!(tenant_id = %tenant_id, tier = %tier, "api: tenant plan updated");

    Ok(ApiResponse::new(&req_id, PlanResponse { tenant_id, tier }))
}
