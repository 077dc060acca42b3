//! Delivery engine against `wiremock` endpoints and the in-memory store.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use leadscout_core::Tier;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use leadscout_webhook::{
    verify, DeliveryStatus, DeliveryStore, DispatchOutcome, LeadSummary, MemoryDeliveryStore,
    Notification, WebhookEngine, SIGNATURE_HEADER,
};

const SECRET: &str = "whsec_test";

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap()
}

fn notification() -> Notification {
    Notification::new_leads(
        "t1",
        7,
        "CRM watch",
        vec![LeadSummary {
            result_id: 11,
            title: "Anyone moved off Salesforce?".into(),
            source_url: "https://reddit.com/r/sales/comments/11".into(),
            platform: "reddit".into(),
            lead_score: 81,
            sentiment: Some("negative".into()),
            category: Some("switching".into()),
            summary: Some("Team of 12 evaluating alternatives".into()),
        }],
        now(),
    )
}

fn engine(store: &Arc<MemoryDeliveryStore>) -> WebhookEngine<MemoryDeliveryStore> {
    WebhookEngine::new(Arc::clone(store), 5, "leadscout-test/0.1", 5)
        .expect("failed to build test engine")
}

#[tokio::test]
async fn ineligible_tier_is_reported_not_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryDeliveryStore::new(now()));
    store.add_webhook("t1", &format!("{}/hook", server.uri()), SECRET);

    let outcome = engine(&store)
        .dispatch(Tier::Starter, &notification(), now())
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::NotEligible { tier: Tier::Starter });
    assert!(store.deliveries().is_empty());
}

#[tokio::test]
async fn success_is_signed_and_recorded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header_exists(SIGNATURE_HEADER))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryDeliveryStore::new(now()));
    store.add_webhook("t1", &format!("{}/hook", server.uri()), SECRET);

    let outcome = engine(&store)
        .dispatch(Tier::Pro, &notification(), now())
        .await
        .unwrap();

    let DispatchOutcome::Dispatched {
        deliveries,
        failed_webhooks,
    } = outcome
    else {
        panic!("expected Dispatched, got {outcome:?}");
    };
    assert_eq!(deliveries.len(), 1);
    assert!(failed_webhooks.is_empty());
    assert_eq!(deliveries[0].status, DeliveryStatus::Success);

    let stored = store.delivery(deliveries[0].delivery_id).unwrap();
    assert_eq!(stored.state.last_status_code, Some(200));
    assert_eq!(stored.state.completed_at, Some(now()));
    assert_eq!(stored.state.attempt_count, 1);

    let received: Vec<Request> = server.received_requests().await.unwrap();
    let request = &received[0];
    let signature = request
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(verify(SECRET, &request.body, signature));

    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["event"], "new_leads");
    assert_eq!(body["leads"][0]["result_id"], 11);
}

#[tokio::test]
async fn server_error_schedules_first_retry_one_minute_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryDeliveryStore::new(now()));
    store.add_webhook("t1", &format!("{}/hook", server.uri()), SECRET);

    engine(&store)
        .dispatch(Tier::Enterprise, &notification(), now())
        .await
        .unwrap();

    let delivery = &store.deliveries()[0];
    assert_eq!(delivery.state.status, DeliveryStatus::Retrying);
    assert_eq!(delivery.state.attempt_count, 1);
    assert_eq!(delivery.state.last_status_code, Some(500));
    assert_eq!(delivery.state.next_retry_at, Some(now() + Duration::minutes(1)));
}

#[tokio::test]
async fn sweep_walks_the_ladder_until_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryDeliveryStore::new(now()));
    store.add_webhook("t1", &format!("{}/hook", server.uri()), SECRET);
    let engine = engine(&store);
    engine
        .dispatch(Tier::Pro, &notification(), now())
        .await
        .unwrap();

    // Not yet due.
    let early = engine.sweep_due(now() + Duration::seconds(30), 100).await.unwrap();
    assert_eq!(early.attempted, 0);

    let mut at = now();
    for _ in 0..4 {
        at = store.deliveries()[0].state.next_retry_at.unwrap();
        let report = engine.sweep_due(at, 100).await.unwrap();
        assert_eq!(report.attempted, 1);
    }

    let delivery = &store.deliveries()[0];
    assert_eq!(delivery.state.status, DeliveryStatus::Failed);
    assert_eq!(delivery.state.attempt_count, 5);
    assert_eq!(delivery.state.completed_at, Some(at));
    assert_eq!(
        at - now(),
        Duration::minutes(1 + 5 + 15 + 60),
        "ladder 1, 5, 15, 60 minutes between attempts"
    );

    let after = engine.sweep_due(at + Duration::days(1), 100).await.unwrap();
    assert_eq!(after.attempted, 0, "failed deliveries are never swept");
    assert_eq!(server.received_requests().await.unwrap().len(), 5);
}

#[tokio::test]
async fn retry_that_succeeds_completes_the_delivery() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryDeliveryStore::new(now()));
    store.add_webhook("t1", &format!("{}/hook", server.uri()), SECRET);
    let engine = engine(&store);
    engine
        .dispatch(Tier::Pro, &notification(), now())
        .await
        .unwrap();

    let report = engine
        .sweep_due(now() + Duration::minutes(1), 100)
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);

    let delivery = &store.deliveries()[0];
    assert_eq!(delivery.state.status, DeliveryStatus::Success);
    assert_eq!(delivery.state.attempt_count, 2);
    assert_eq!(delivery.state.last_status_code, Some(204));
}

#[tokio::test]
async fn overlapping_sweeps_post_each_due_delivery_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryDeliveryStore::new(now()));
    store.add_webhook("t1", &format!("{}/hook", server.uri()), SECRET);
    let engine = engine(&store);
    engine
        .dispatch(Tier::Pro, &notification(), now())
        .await
        .unwrap();

    let due_at = now() + Duration::minutes(1);
    let (first, second) = tokio::join!(engine.sweep_due(due_at, 100), engine.sweep_due(due_at, 100));
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.attempted + second.attempted, 1);
    assert_eq!(first.succeeded + second.succeeded, 1);
    let delivery = &store.deliveries()[0];
    assert_eq!(delivery.state.status, DeliveryStatus::Success);
    assert_eq!(delivery.state.attempt_count, 2);
}

#[tokio::test]
async fn claimed_delivery_is_swept_again_after_its_lease() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryDeliveryStore::new(now()));
    store.add_webhook("t1", &format!("{}/hook", server.uri()), SECRET);
    let engine = engine(&store);
    engine
        .dispatch(Tier::Pro, &notification(), now())
        .await
        .unwrap();

    // A sweeper that claims and then dies leaves the delivery leased.
    let due_at = now() + Duration::minutes(1);
    let lease_until = due_at + Duration::minutes(5);
    let claimed = store.claim_due(due_at, lease_until, 100).await.unwrap();
    assert_eq!(claimed.len(), 1);

    let during = engine.sweep_due(due_at + Duration::minutes(2), 100).await.unwrap();
    assert_eq!(during.attempted, 0);

    let after = engine.sweep_due(lease_until, 100).await.unwrap();
    assert_eq!(after.attempted, 1);
    assert_eq!(store.deliveries()[0].state.attempt_count, 2);
}

#[tokio::test]
async fn store_failure_for_one_target_does_not_stop_the_others() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryDeliveryStore::new(now()));
    let broken = store.add_webhook("t1", &format!("{}/broken", server.uri()), SECRET);
    let healthy = store.add_webhook("t1", &format!("{}/ok", server.uri()), SECRET);
    store.set_create_fails(broken);

    let outcome = engine(&store)
        .dispatch(Tier::Pro, &notification(), now())
        .await
        .unwrap();

    let DispatchOutcome::Dispatched {
        deliveries,
        failed_webhooks,
    } = outcome
    else {
        panic!("expected Dispatched, got {outcome:?}");
    };
    assert_eq!(failed_webhooks, vec![broken]);
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].webhook_id, healthy);
    assert_eq!(deliveries[0].status, DeliveryStatus::Success);
}

#[tokio::test]
async fn unreachable_endpoint_is_a_retryable_failure() {
    let store = Arc::new(MemoryDeliveryStore::new(now()));
    // Port 9 (discard) on localhost is not listening in test environments.
    store.add_webhook("t1", "http://127.0.0.1:9/hook", SECRET);

    engine(&store)
        .dispatch(Tier::Pro, &notification(), now())
        .await
        .unwrap();

    let delivery = &store.deliveries()[0];
    assert_eq!(delivery.state.status, DeliveryStatus::Retrying);
    assert_eq!(delivery.state.last_status_code, None);
    assert!(delivery
        .state
        .last_error
        .as_deref()
        .unwrap()
        .contains("HTTP request failed"));
}

#[tokio::test]
async fn purge_removes_old_deliveries_regardless_of_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryDeliveryStore::new(now() - Duration::days(31)));
    store.add_webhook("t1", &format!("{}/hook", server.uri()), SECRET);
    let engine = engine(&store);
    engine
        .dispatch(Tier::Pro, &notification(), now() - Duration::days(31))
        .await
        .unwrap();

    store.set_now(now());
    engine
        .dispatch(Tier::Pro, &notification(), now())
        .await
        .unwrap();

    let purged = engine.purge(now(), 30).await.unwrap();
    assert_eq!(purged, 1);
    let remaining = store.deliveries();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].created_at, now());
}
