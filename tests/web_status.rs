mod support;

use axum::{body::{Body, to_bytes}, http::{Request, StatusCode}, Router};
use spool_rs::breaker::CircuitBreaker;
use spool_rs::job_processor::{JobProcessor, ProcessorSettings};
use spool_rs::observer::{AgentEvent, AgentObserver, AgentStatus, StatusTracker};
use spool_rs::poller::Poller;
use spool_rs::stats::AgentStats;
use spool_rs::transport::GuardedClient;
use spool_rs::web::api::{create_router, AppStateInner};
use spool_shared::FetchResult;
use std::sync::Arc;
use support::{job, FakePrinter, FakeTransport};
use tower::ServiceExt; // for .oneshot()

fn app(with_poller: bool) -> (Router, Arc<FakeTransport>, Arc<CircuitBreaker>, StatusTracker) {
    let transport = Arc::new(FakeTransport::new());
    let printer = Arc::new(FakePrinter::with_default("kitchen"));
    let breaker = Arc::new(CircuitBreaker::default());
    let stats = Arc::new(AgentStats::new());
    let status = StatusTracker::default();
    let observer: Arc<dyn AgentObserver> = Arc::new(status.clone());

    let poller = with_poller.then(|| {
        let client = GuardedClient::new(transport.clone(), breaker.clone());
        let processor = Arc::new(JobProcessor::new(
            client.clone(),
            printer.clone(),
            observer.clone(),
            stats.clone(),
            ProcessorSettings::default(),
        ));
        Arc::new(Poller::new(client, processor, observer.clone(), stats.clone()))
    });

    let state = Arc::new(AppStateInner {
        stats,
        breaker: breaker.clone(),
        status: status.clone(),
        printer,
        poller,
        updater: None,
    });
    (create_router(state), transport, breaker, status)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_status_reports_agent_and_circuit() {
    let (app, _transport, breaker, status) = app(true);
    status.on_event(AgentEvent::StatusChanged(AgentStatus::Operational));
    for _ in 0..5 {
        breaker.record_failure();
    }

    let response = app.oneshot(get("/api/v1/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "operational");
    assert_eq!(json["circuit"], "open");
    assert_eq!(json["consecutive_failures"], 5);
    assert!(json["cooldown_remaining_ms"].as_u64().unwrap() > 0);
    assert_eq!(json["update"], serde_json::Value::Null);
    assert_eq!(json["stats"]["jobs_processed"], 0);
}

#[tokio::test]
async fn test_printers_lists_default() {
    let (app, ..) = app(true);
    let response = app.oneshot(get("/api/v1/printers")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["default"], "kitchen");
    assert_eq!(json["printers"][0], "kitchen");
}

#[tokio::test]
async fn test_manual_poll_dispatches_jobs() {
    let (app, transport, ..) = app(true);
    transport.queue_fetch(Ok(FetchResult::ok(vec![job(1), job(2)])));

    let response = app.clone().oneshot(post("/api/v1/poll")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["outcome"], "dispatched");
    assert_eq!(json["dispatched"], 2);

    let response = app.oneshot(post("/api/v1/poll")).await.unwrap();
    assert_eq!(json_body(response).await["outcome"], "idle");
}

#[tokio::test]
async fn test_manual_poll_respects_open_circuit() {
    let (app, transport, breaker, _) = app(true);
    for _ in 0..5 {
        breaker.record_failure();
    }
    let response = app.oneshot(post("/api/v1/poll")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(transport.fetch_calls(), 0);
}

#[tokio::test]
async fn test_manual_poll_without_poller() {
    let (app, ..) = app(false);
    let response = app.oneshot(post("/api/v1/poll")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["error"], "Polling is not running");
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let (app, ..) = app(true);
    let response = app.oneshot(get("/api/v1/nope")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "Not found");
}
