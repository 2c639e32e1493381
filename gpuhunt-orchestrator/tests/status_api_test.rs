// Integration tests for the status endpoint

use axum_test::TestServer;
use gpuhunt_orchestrator::state::HuntState;
use gpuhunt_orchestrator::status_api::{router, StatusApiState};
use std::sync::Arc;

#[tokio::test]
async fn test_root_banner() {
    let state = Arc::new(StatusApiState {
        hunt: Arc::new(HuntState::default()),
        max_orders: 3,
    });
    let server = TestServer::new(router(state)).unwrap();

    let response = server.get("/").await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.text(), "gpuhunt orchestrator online");
}

#[tokio::test]
async fn test_status_reports_counters() {
    let hunt = Arc::new(HuntState::new(vec![7]));
    hunt.begin_monitor("RTX 3060");
    hunt.record_success("RTX 3060");
    hunt.end_monitor("RTX 3060");
    hunt.begin_monitor("RTX 3090");
    hunt.record_destroyed(42);
    hunt.end_monitor("RTX 3090");

    let state = Arc::new(StatusApiState {
        hunt: hunt.clone(),
        max_orders: 3,
    });
    let server = TestServer::new(router(state)).unwrap();

    let response = server.get("/admin/status").await;
    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["max_orders"], 3);
    assert_eq!(body["placed_orders"], 2);
    assert_eq!(body["successful_orders"], 1);
    assert_eq!(body["destroyed_instances"], 1);
    assert_eq!(body["in_flight"], 0);
    assert_eq!(body["ignored_machines"], serde_json::json!([7, 42]));
    assert_eq!(body["per_model_success"]["RTX 3060"], 1);
    assert_eq!(body["run_id"], hunt.run_id().to_string());
}
