use axum::{Extension, Json};
use leadscout_core::{validate_query, QueryValidation};
use serde::Deserialize;

use crate::middleware::RequestId;

use super::ApiResponse;

#[derive(Debug, Deserialize)]
pub(in crate::api) struct ValidateQueryRequest {
    pub query: String,
}

/// POST /api/v1/queries/validate
///
/// Always 200: an invalid query is a normal answer, not a request error.
pub(in crate::api) async fn validate(
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<ValidateQueryRequest>,
) -> Json<ApiResponse<QueryValidation>> {
    ApiResponse::new(&req_id, validate_query(&body.query))
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::super::test_support::open_app;

    async fn post_query(query: &str) -> serde_json::Value {
        let response = open_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/queries/validate")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::json!({ "query": query }).to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&body).expect("json parse")
    }

    #[tokio::test]
    async fn valid_query_reports_no_error() {
        let json = post_query("crm AND (salesforce OR hubspot) NOT jobs").await;
        assert_eq!(json["data"]["valid"], true);
        assert!(json["data"]["error"].is_null());
        assert!(json["meta"]["request_id"].is_string());
    }

    #[tokio::test]
    async fn lone_operator_is_rejected() {
        let json = post_query("AND").await;
        assert_eq!(json["data"]["valid"], false);
        assert!(json["data"]["error"].is_string());
    }

    #[tokio::test]
    async fn empty_field_value_is_rejected() {
        let json = post_query("title: ").await;
        assert_eq!(json["data"]["valid"], false);
    }
}
