//! Tests for the ops HTTP surface.

use axum::http::StatusCode;
use axum_test::TestServer;
use integration_tests::setup::TestContext;

fn server(ctx: &TestContext) -> TestServer {
    TestServer::new(ctx.router.clone()).expect("Failed to create test server")
}

/// /health returns the expected structure and reports healthy over the
/// in-memory store.
#[tokio::test]
async fn health_endpoint_structure() {
    let ctx = TestContext::new();
    let response = server(&ctx).get("/health").await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store_connected"], true);
    assert_eq!(body["deletion_queue_depth"], 0);
    assert!(body.get("pool_usage_percent").is_some());

    let components = body["components"].as_array().unwrap();
    let names: Vec<&str> = components
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["store", "scheduler", "deletion"]);
    assert!(components.iter().all(|c| c["healthy"] == true));
}

/// A failing store degrades the aggregate status; the worker components
/// stay healthy.
#[tokio::test]
async fn store_outage_degrades_health() {
    let ctx = TestContext::new();
    ctx.store.set_healthy(false);

    let body: serde_json::Value = server(&ctx).get("/health").await.json();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["store_connected"], false);
    let store = body["components"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["name"] == "store")
        .unwrap();
    assert_eq!(store["healthy"], false);
    assert!(store["message"].is_string());
}

#[tokio::test]
async fn ready_follows_store_health() {
    let ctx = TestContext::new();
    let srv = server(&ctx);

    srv.get("/health/ready").await.assert_status_ok();

    ctx.store.set_healthy(false);
    let response = srv.get("/health/ready").await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);

    // Liveness is independent of the store.
    srv.get("/health/live").await.assert_status_ok();
}

/// /rollup/status lists every tier with schedule and queue flags.
#[tokio::test]
async fn rollup_status_lists_all_tiers() {
    let ctx = TestContext::new();
    let response = server(&ctx).get("/rollup/status").await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    let tiers = body.as_array().expect("status should be an array");
    assert_eq!(tiers.len(), 6);

    let names: Vec<&str> = tiers.iter().map(|t| t["tier"].as_str().unwrap()).collect();
    assert_eq!(
        names,
        vec!["15min", "hourly", "daily", "weekly", "monthly", "cleanup"]
    );
    for tier in tiers {
        assert_eq!(tier["queued"], false);
        assert_eq!(tier["running"], false);
        assert!(tier["last_run"].is_null());
        assert!(tier["last_result"].is_null());
        assert!(tier["next_fire"].is_string());
    }
}

/// Manual trigger runs the tier synchronously and returns the same
/// structured result a scheduled run produces.
#[tokio::test]
async fn trigger_returns_run_result() {
    let ctx = TestContext::new();
    let srv = server(&ctx);

    let response = srv.post("/rollup/trigger/hourly").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["tier"], "hourly");
    // Empty store: the run completes as a no-data skip.
    assert_eq!(body["skipped"], true);
    assert_eq!(body["reason"], "no_data");
    assert_eq!(body["aggregates_written"], 0);

    // The run is stamped in the status view.
    let status: serde_json::Value = srv.get("/rollup/status").await.json();
    let hourly = status
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["tier"] == "hourly")
        .unwrap();
    assert!(hourly["last_run"].is_string());

    let response = srv.post("/rollup/trigger/fortnightly").await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "VALID_001");
}

/// Triggering a tier whose rollup actually has data writes aggregates.
#[tokio::test]
async fn trigger_runs_rollup_with_data() {
    use integration_tests::fixtures::counter_series;
    use rollup_core::{bucket_floor, Resolution};

    let ctx = TestContext::new();
    // Manual runs use the wall clock, so the samples must sit in recent,
    // already-complete buckets.
    let start = bucket_floor(
        Resolution::FifteenMin,
        chrono::Utc::now() - chrono::Duration::hours(2),
    );
    ctx.store
        .push_samples(counter_series("meter-1", start, 1, 1.0));

    let response = server(&ctx).post("/rollup/trigger/15min").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["skipped"], false);
    assert_eq!(body["aggregates_written"], 4);
    assert_eq!(ctx.store.aggregates_at(Resolution::FifteenMin).len(), 4);
}

/// Re-triggering a tier that is already queued returns 409, never a
/// second dispatch.
#[tokio::test]
async fn trigger_conflicts_while_queued() {
    let ctx = TestContext::new();
    let srv = server(&ctx);

    // A scheduled job for the tier is queued but not yet dispatched.
    ctx.scheduler.trigger(rollup_core::Tier::Daily).unwrap();

    let response = srv.post("/rollup/trigger/daily").await;
    response.assert_status(StatusCode::CONFLICT);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "JOB_001");

    // The queued flag is visible in the status view.
    let status: serde_json::Value = srv.get("/rollup/status").await.json();
    let daily = status
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["tier"] == "daily")
        .unwrap();
    assert_eq!(daily["queued"], true);
}

#[tokio::test]
async fn deletion_stats_start_empty() {
    let ctx = TestContext::new();
    let response = server(&ctx).get("/deletion/stats").await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert_eq!(body["queue_depth"], 0);
    assert_eq!(body["processed"], 0);
    assert_eq!(body["failed"], 0);
    assert_eq!(body["abandoned"], 0);
    assert_eq!(body["rows_deleted"], 0);
}

/// /pool/stats reflects the arbiter's effective-usage math.
#[tokio::test]
async fn pool_stats_reflect_usage() {
    let ctx = TestContext::new();
    let srv = server(&ctx);

    ctx.store.set_pool(4, 10);
    let body: serde_json::Value = srv.get("/pool/stats").await.json();
    assert_eq!(body["in_use"], 4);
    assert_eq!(body["max"], 10);
    assert_eq!(body["usage_percent"], 40.0);
    // 20% of the pool is reserved for live ingestion, so 4 of an
    // effective 8 connections are in use.
    assert_eq!(body["effective_usage_percent"], 50.0);
    assert_eq!(body["available"], true);

    ctx.store.set_pool(10, 10);
    let body: serde_json::Value = srv.get("/pool/stats").await.json();
    assert_eq!(body["available"], false);
}
