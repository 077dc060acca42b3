//! Monitor creation and user-triggered scans.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use leadscout_core::{
    can_access_platform, check_keywords_limit, check_monitor_limit, validate_query, ActiveHours,
    Platform, Tier,
};
use leadscout_pipeline::{request_manual_scan, ManualScanOutcome};
use serde::{Deserialize, Serialize};

use crate::middleware::RequestId;

use super::{map_db_error, map_pipeline_error, tenant_id, ApiError, ApiResponse, AppState};

const MAX_NAME_LEN: usize = 200;

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(in crate::api) struct CreateMonitorRequest {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub boolean_query: Option<String>,
    pub company_name: Option<String>,
    pub platforms: Vec<String>,
    /// Platform id to URL, for review and app-store platforms.
    #[serde(default)]
    pub target_urls: BTreeMap<String, String>,
    pub active_hours: Option<ActiveHours>,
}

#[derive(Debug, Serialize)]
pub(in crate::api) struct MonitorResponse {
    pub id: i64,
    pub public_id: uuid::Uuid,
    pub name: String,
    pub platforms: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub(in crate::api) struct ScanAccepted {
    pub monitor_id: i64,
    pub status: &'static str,
}

/// A create request that passed every check not depending on the tier.
#[derive(Debug, PartialEq)]
struct ValidatedMonitor {
    name: String,
    keywords: Vec<String>,
    boolean_query: Option<String>,
    company_name: Option<String>,
    platforms: Vec<Platform>,
    target_urls: BTreeMap<Platform, String>,
    active_hours: Option<ActiveHours>,
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

fn invalid(rid: &str, message: impl Into<String>) -> ApiError {
    ApiError::new(rid, "validation_error", message)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn is_http_url(value: &str) -> bool {
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"));
    rest.is_some_and(|r| !r.is_empty() && !r.starts_with('/') && !r.contains(char::is_whitespace))
}

fn validate_request(rid: &str, body: CreateMonitorRequest) -> Result<ValidatedMonitor, ApiError> {
    let name = body.name.trim().to_owned();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(invalid(
            rid,
            format!("name must be 1-{MAX_NAME_LEN} characters"),
        ));
    }

    let keywords: Vec<String> = body
        .keywords
        .iter()
        .map(|k| k.trim().to_owned())
        .filter(|k| !k.is_empty())
        .collect();
    let boolean_query = non_blank(body.boolean_query);
    let company_name = non_blank(body.company_name);

    if keywords.is_empty() && boolean_query.is_none() && company_name.is_none() {
        return Err(invalid(
            rid,
            "a monitor needs keywords, a boolean query or a company name",
        ));
    }
    if let Some(query) = &boolean_query {
        let validation = validate_query(query);
        if !validation.valid {
            return Err(invalid(
                rid,
                format!(
                    "invalid boolean query: {}",
                    validation.error.unwrap_or_default()
                ),
            ));
        }
    }

    let mut platforms = Vec::with_capacity(body.platforms.len());
    for raw in &body.platforms {
        let platform = raw
            .parse::<Platform>()
            .map_err(|e| invalid(rid, e.to_string()))?;
        if !platforms.contains(&platform) {
            platforms.push(platform);
        }
    }
    if platforms.is_empty() {
        return Err(invalid(rid, "at least one platform is required"));
    }

    let mut target_urls = BTreeMap::new();
    for (raw, url) in body.target_urls {
        let platform = raw
            .parse::<Platform>()
            .map_err(|e| invalid(rid, e.to_string()))?;
        let url = url.trim().to_owned();
        if !is_http_url(&url) {
            return Err(invalid(
                rid,
                format!("target URL for {platform} must be an http(s) URL"),
            ));
        }
        target_urls.insert(platform, url);
    }
    if let Some(missing) = platforms
        .iter()
        .find(|p| p.requires_target_url() && !target_urls.contains_key(*p))
    {
        return Err(invalid(
            rid,
            format!("{missing} requires a target URL"),
        ));
    }

    if let Some(hours) = &body.active_hours {
        hours.validate().map_err(|e| invalid(rid, e))?;
    }

    Ok(ValidatedMonitor {
        name,
        keywords,
        boolean_query,
        company_name,
        platforms,
        target_urls,
        active_hours: body.active_hours,
    })
}

fn check_entitlements(rid: &str, monitor: &ValidatedMonitor, tier: Tier) -> Result<(), ApiError> {
    let keywords = check_keywords_limit(&monitor.keywords, tier);
    if !keywords.allowed {
        return Err(ApiError::new(
            rid,
            "forbidden",
            keywords.message.unwrap_or_default(),
        ));
    }
    if let Some(platform) = monitor
        .platforms
        .iter()
        .find(|p| !can_access_platform(tier, **p))
    {
        return Err(ApiError::new(
            rid,
            "forbidden",
            format!("the {tier} plan does not include {platform}"),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/monitors
pub(in crate::api) async fn create_monitor(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    headers: HeaderMap,
    Json(body): Json<CreateMonitorRequest>,
) -> Result<(StatusCode, Json<ApiResponse<MonitorResponse>>), ApiError> {
    let rid = &req_id.0;
    let tenant = tenant_id(rid, &headers)?;
    let monitor = validate_request(rid, body)?;

    let tier = state
        .tier_for(&tenant)
        .await
        .map_err(|e| map_pipeline_error(rid.clone(), &e))?;
    check_entitlements(rid, &monitor, tier)?;

    let current = leadscout_db::count_tenant_monitors(&state.pool, &tenant)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    let limit = check_monitor_limit(tier, u32::try_from(current).unwrap_or(u32::MAX));
    if !limit.allowed {
        return Err(ApiError::new(
            rid,
            "forbidden",
            format!(
                "the {tier} plan allows at most {} monitors",
                limit.limit
            ),
        ));
    }

    let target_urls: BTreeMap<&str, &str> = monitor
        .target_urls
        .iter()
        .map(|(p, url)| (p.as_str(), url.as_str()))
        .collect();
    let new_monitor = leadscout_db::NewMonitor {
        tenant_id: tenant.clone(),
        name: monitor.name,
        keywords: monitor.keywords,
        boolean_query: monitor.boolean_query,
        company_name: monitor.company_name,
        platforms: monitor
            .platforms
            .iter()
            .map(|p| p.as_str().to_owned())
            .collect(),
        target_urls: serde_json::json!(target_urls),
        active_hours: monitor
            .active_hours
            .as_ref()
            .map(|h| serde_json::json!(h)),
    };

    let row = leadscout_db::create_monitor(&state.pool, &new_monitor)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    tracing::info!(
        monitor_id = row.id,
        tenant_id = %tenant,
        tier = %tier,
        platforms = row.platforms.len(),
        "api: monitor created"
    );

    Ok((
        StatusCode::CREATED,
        ApiResponse::new(
            &req_id,
            MonitorResponse {
                id: row.id,
                public_id: row.public_id,
                name: row.name,
                platforms: row.platforms,
                is_active: row.is_active,
                created_at: row.created_at,
            },
        ),
    ))
}

/// POST /api/v1/monitors/{id}/scan
///
/// Claims the monitor and runs the scan in the background; the response
/// only says whether the scan started.
pub(in crate::api) async fn trigger_scan(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    headers: HeaderMap,
    Path(monitor_id): Path<i64>,
) -> Result<(StatusCode, Json<ApiResponse<ScanAccepted>>), ApiError> {
    let rid = &req_id.0;
    let tenant = tenant_id(rid, &headers)?;
    let tier = state
        .tier_for(&tenant)
        .await
        .map_err(|e| map_pipeline_error(rid.clone(), &e))?;

    let now = Utc::now();
    let outcome = request_manual_scan(state.pipeline.store().as_ref(), monitor_id, &tenant, tier, now)
        .await
        .map_err(|e| map_pipeline_error(rid.clone(), &e))?;

    match outcome {
        ManualScanOutcome::Accepted { monitor, tier } => {
            let pipeline = std::sync::Arc::clone(&state.pipeline);
            tokio::spawn(async move {
                pipeline.run_manual_scan(&monitor, tier, Utc::now()).await;
            });
            Ok((
                StatusCode::ACCEPTED,
                ApiResponse::new(
                    &req_id,
                    ScanAccepted {
                        monitor_id,
                        status: "started",
                    },
                ),
            ))
        }
        rejected => Err(manual_rejection(rid, rejected)),
    }
}

fn manual_rejection(rid: &str, outcome: ManualScanOutcome) -> ApiError {
    match outcome {
        ManualScanOutcome::NotFound => ApiError::new(rid, "not_found", "monitor not found"),
        ManualScanOutcome::Inactive => {
            ApiError::new(rid, "bad_request", "monitor is not active")
        }
        ManualScanOutcome::InProgress => {
            ApiError::new(rid, "conflict", "a scan is already in progress for this monitor")
        }
        ManualScanOutcome::Cooldown {
            remaining,
            next_scan_at,
        } => {
            let minutes = (remaining.num_seconds() + 59) / 60;
            ApiError::new(
                rid,
                "rate_limited",
                format!(
                    "manual scan cooling down: {minutes} minutes remaining (next scan at {})",
                    next_scan_at.to_rfc3339()
                ),
            )
            .with_retry_after(remaining.num_seconds())
        }
        ManualScanOutcome::DailyCap { limit } => ApiError::new(
            rid,
            "rate_limited",
            format!("daily manual scan limit of {limit} reached"),
        ),
        ManualScanOutcome::Accepted { .. } => {
            ApiError::new(rid, "internal_error", "unexpected scan outcome")
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use axum::response::IntoResponse;
    use chrono::Duration;
    use tower::ServiceExt;

    use super::super::test_support::open_app;
    use super::*;

    fn request(json: serde_json::Value) -> CreateMonitorRequest {
        serde_json::from_value(json).expect("request body")
    }

    #[test]
    fn validate_trims_and_dedups() {
        let monitor = validate_request(
            "r",
            request(serde_json::json!({
                "name": "  CRM watch ",
                "keywords": [" crm ", "", "salesforce"],
                "platforms": ["reddit", "REDDIT", "hackernews"],
            })),
        )
        .unwrap();
        assert_eq!(monitor.name, "CRM watch");
        assert_eq!(monitor.keywords, vec!["crm", "salesforce"]);
        assert_eq!(monitor.platforms, vec![Platform::Reddit, Platform::HackerNews]);
    }

    #[test]
    fn validate_rejects_unknown_platform() {
        let err = validate_request(
            "r",
            request(serde_json::json!({
                "name": "m",
                "keywords": ["crm"],
                "platforms": ["myspace"],
            })),
        )
        .unwrap_err();
        assert_eq!(err.error.code, "validation_error");
        assert!(err.error.message.contains("myspace"));
    }

    #[test]
    fn validate_requires_target_url_for_review_platforms() {
        let err = validate_request(
            "r",
            request(serde_json::json!({
                "name": "m",
                "keywords": ["crm"],
                "platforms": ["g2"],
            })),
        )
        .unwrap_err();
        assert!(err.error.message.contains("g2 requires a target URL"));

        let ok = validate_request(
            "r",
            request(serde_json::json!({
                "name": "m",
                "keywords": ["crm"],
                "platforms": ["g2"],
                "target_urls": {"g2": "https://www.g2.com/products/acme/reviews"},
            })),
        )
        .unwrap();
        assert_eq!(
            ok.target_urls.get(&Platform::G2).map(String::as_str),
            Some("https://www.g2.com/products/acme/reviews")
        );
    }

    #[test]
    fn validate_rejects_bad_active_hours() {
        let err = validate_request(
            "r",
            request(serde_json::json!({
                "name": "m",
                "keywords": ["crm"],
                "platforms": ["reddit"],
                "active_hours": {"start_hour": 9, "end_hour": 24},
            })),
        )
        .unwrap_err();
        assert_eq!(err.error.code, "validation_error");
    }

    #[test]
    fn http_url_check() {
        assert!(is_http_url("https://apps.apple.com/app/id1"));
        assert!(is_http_url("http://example.com"));
        assert!(!is_http_url("ftp://example.com"));
        assert!(!is_http_url("https://"));
        assert!(!is_http_url("https:///path"));
        assert!(!is_http_url("https://exa mple.com"));
    }

    #[test]
    fn entitlements_enforce_keyword_and_platform_limits() {
        let mut monitor = ValidatedMonitor {
            name: "m".into(),
            keywords: vec!["a".into(), "b".into(), "c".into()],
            boolean_query: None,
            company_name: None,
            platforms: vec![Platform::Reddit],
            target_urls: BTreeMap::new(),
            active_hours: None,
        };
        assert!(check_entitlements("r", &monitor, Tier::Free).is_ok());

        monitor.keywords.push("d".into());
        let err = check_entitlements("r", &monitor, Tier::Free).unwrap_err();
        assert_eq!(err.error.code, "forbidden");
        assert!(check_entitlements("r", &monitor, Tier::Starter).is_ok());

        monitor.platforms.push(Platform::AppStore);
        let err = check_entitlements("r", &monitor, Tier::Pro).unwrap_err();
        assert!(err.error.message.contains("app_store"));
        assert!(check_entitlements("r", &monitor, Tier::Enterprise).is_ok());
    }

    #[test]
    fn manual_rejections_map_to_statuses() {
        let now = Utc::now();
        let cases = [
            (ManualScanOutcome::NotFound, StatusCode::NOT_FOUND),
            (ManualScanOutcome::Inactive, StatusCode::BAD_REQUEST),
            (ManualScanOutcome::InProgress, StatusCode::CONFLICT),
            (
                ManualScanOutcome::Cooldown {
                    remaining: Duration::minutes(90),
                    next_scan_at: now + Duration::minutes(90),
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                ManualScanOutcome::DailyCap { limit: 5 },
                StatusCode::TOO_MANY_REQUESTS,
            ),
        ];
        for (outcome, status) in cases {
            let response = manual_rejection("r", outcome).into_response();
            assert_eq!(response.status(), status);
        }
    }

    #[test]
    fn cooldown_rejection_reports_remaining_time() {
        let err = manual_rejection(
            "r",
            ManualScanOutcome::Cooldown {
                remaining: Duration::seconds(90 * 60),
                next_scan_at: Utc::now(),
            },
        );
        assert_eq!(err.error.retry_after_secs, Some(5400));
        assert!(err.error.message.contains("90 minutes remaining"));
    }

    #[tokio::test]
    async fn create_monitor_rejects_invalid_query_before_touching_the_database() {
        let response = open_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/monitors")
                    .header("content-type", "application/json")
                    .header("x-tenant-id", "t1")
                    .body(Body::from(
                        serde_json::json!({
                            "name": "CRM",
                            "boolean_query": "\"crm tools",
                            "platforms": ["reddit"],
                        })
                        .to_string(),
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let json: serde_json::Value = serde_json::from_slice(&body).expect("json parse");
        assert_eq!(json["error"]["code"], "validation_error");
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("unmatched quote"));
    }

    #[tokio::test]
    async fn create_monitor_requires_tenant_header() {
        let response = open_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/monitors")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "name": "CRM",
                            "keywords": ["crm"],
                            "platforms": ["reddit"],
                        })
                        .to_string(),
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
