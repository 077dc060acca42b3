//! Offline tests for leadscout-db pool configuration and row types.
//! These tests do not require a live database connection.

use leadscout_core::{AppConfig, Environment};
use leadscout_db::{DeliveryRow, PersistOutcome, PoolConfig};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[test]
fn pool_config_from_app_config_uses_core_values() {
    let app_config = AppConfig {
        database_url: "postgres://example".to_string(),
        env: Environment::Test,
        bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 3000),
        log_level: "info".to_string(),
        db_max_connections: 42,
        db_min_connections: 7,
        db_acquire_timeout_secs: 9,
        connector_timeout_secs: 30,
        connector_user_agent: "ua".to_string(),
        connector_base_url: None,
        connector_token: None,
        scan_cron: "0 */15 * * * *".to_string(),
        scan_slot_minutes: 15,
        scan_max_concurrent_monitors: 8,
        stagger_jitter_ratio: 0.1,
        analysis_batch_threshold: 50,
        webhook_timeout_secs: 10,
        webhook_max_attempts: 5,
        webhook_retention_days: 30,
        webhook_sweep_cron: "0 * * * * *".to_string(),
    };

    let pool_config = PoolConfig::from_app_config(&app_config);
    assert_eq!(pool_config.max_connections, 42);
    assert_eq!(pool_config.min_connections, 7);
    assert_eq!(pool_config.acquire_timeout_secs, 9);
}

/// Compile-time smoke test: confirm that [`DeliveryRow`] has all expected
/// fields with the correct types. No database required.
#[test]
fn delivery_row_has_expected_fields() {
    use chrono::Utc;

    let row = DeliveryRow {
        id: 1_i64,
        webhook_id: 2_i64,
        event_type: "new_leads".to_string(),
        payload: serde_json::json!({"count": 1}),
        status: "pending".to_string(),
        attempt_count: 0_i32,
        max_attempts: 5_i32,
        next_retry_at: None,
        last_status_code: None,
        last_error: None,
        completed_at: None,
        created_at: Utc::now(),
    };

    assert_eq!(row.status, "pending");
    assert!(row.attempt_count <= row.max_attempts);
    assert!(row.completed_at.is_none());
}

#[test]
fn persist_outcome_serializes_for_stage_memos() {
    let outcome = PersistOutcome {
        inserted_ids: vec![3, 4],
        tenant_results_before: 0,
        enrichment_events: 0,
    };
    let value = serde_json::to_value(&outcome).unwrap();
    let back: PersistOutcome = serde_json::from_value(value).unwrap();
    assert_eq!(back, outcome);
}
