//! Routes and handlers of the status API.

use crate::breaker::CircuitBreaker;
use crate::observer::StatusTracker;
use crate::poller::{CycleOutcome, Poller};
use crate::printer::Printer;
use crate::stats::AgentStats;
use crate::update::UpdateOrchestrator;
use crate::web::models::{PollResponse, PrintersResponse, StatusResponse};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct AppStateInner {
    pub stats: Arc<AgentStats>,
    pub breaker: Arc<CircuitBreaker>,
    pub status: StatusTracker,
    pub printer: Arc<dyn Printer>,
    pub poller: Option<Arc<Poller>>,
    pub updater: Option<Arc<UpdateOrchestrator>>,
}
pub type AppState = Arc<AppStateInner>;

/// Helper to create a JSON error response with a message and status code
fn json_error(message: &str, status: StatusCode) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// Creates the Axum router with all the API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/printers", get(get_printers))
        .route("/api/v1/poll", post(trigger_poll))
        .fallback(not_found)
        .with_state(state)
}

/// Serves until the shutdown signal fires.
pub async fn serve(
    addr: &str,
    state: AppState,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Status API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
}

async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: state.status.current(),
        version: spool_shared::AGENT_VERSION.to_string(),
        circuit: state.breaker.state(),
        consecutive_failures: state.breaker.consecutive_failures(),
        cooldown_remaining_ms: state.breaker.remaining_cooldown().map(|d| d.as_millis() as u64),
        update: state.updater.as_ref().map(|u| u.state()),
        stats: state.stats.snapshot(),
    })
}

async fn get_printers(State(state): State<AppState>) -> Json<PrintersResponse> {
    Json(PrintersResponse {
        default: state.printer.default_printer(),
        printers: state.printer.list_available(),
    })
}

/// Runs one poll cycle now, subject to the same single-flight rule as the timer.
async fn trigger_poll(State(state): State<AppState>) -> axum::response::Response {
    let Some(poller) = &state.poller else {
        return json_error("Polling is not running", StatusCode::SERVICE_UNAVAILABLE);
    };
    let outcome = poller.tick().await;
    let (status, label, dispatched) = match outcome {
        CycleOutcome::Skipped => (StatusCode::CONFLICT, "skipped", 0),
        CycleOutcome::CircuitOpen => (StatusCode::SERVICE_UNAVAILABLE, "circuit_open", 0),
        CycleOutcome::FetchFailed => (StatusCode::BAD_GATEWAY, "fetch_failed", 0),
        CycleOutcome::Idle => (StatusCode::OK, "idle", 0),
        CycleOutcome::Dispatched(n) => (StatusCode::OK, "dispatched", n),
    };
    (
        status,
        Json(PollResponse {
            outcome: label.to_string(),
            dispatched,
        }),
    )
        .into_response()
}

async fn not_found() -> axum::response::Response {
    json_error("Not found", StatusCode::NOT_FOUND)
}
