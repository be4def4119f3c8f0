//! Engine worker HTTP surface and research hosting

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::research::ResearchAgent;
use crate::types::{EngineKind, RuntimeError};

#[derive(Clone)]
struct WorkerState {
    engine: EngineKind,
    agent: Arc<ResearchAgent>,
    research_active: Arc<AtomicBool>,
}

/// Hosts one research state machine behind `POST /api/search` + `GET /health`.
pub struct EngineWorker {
    state: WorkerState,
}

impl EngineWorker {
    pub fn new(agent: Arc<ResearchAgent>) -> Self {
        let engine = agent.engine();
        Self {
            state: WorkerState {
                engine,
                agent,
                research_active: Arc::new(AtomicBool::new(false)),
            },
        }
    }

    /// Serve the worker surface on the engine's loopback port.
    pub async fn serve(self, port: u16) -> Result<(), RuntimeError> {
        let engine = self.state.engine;
        let app = self.router();

        let addr = format!("127.0.0.1:{port}");
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RuntimeError::Internal(format!("failed to bind {addr}: {e}")))?;

        tracing::info!("{} engine worker listening on {}", engine, addr);
        axum::serve(listener, app)
            .await
            .map_err(|e| RuntimeError::Internal(format!("worker server error: {e}")))
    }

    fn router(self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/api/search", post(search))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state)
    }
}

async fn health(State(state): State<WorkerState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "engine": state.engine.id(),
        "research_active": state.research_active.load(Ordering::SeqCst),
    }))
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    #[serde(default)]
    query: String,
}

/// Kick off a research run for the query. One run at a time per worker; a
/// second request while one is active is rejected.
async fn search(
    State(state): State<WorkerState>,
    Json(request): Json<SearchRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let query = request.query.trim().to_string();
    if query.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "success": false,
                "message": "Search query cannot be empty"
            })),
        );
    }

    if state
        .research_active
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "success": false,
                "message": "A research run is already in progress"
            })),
        );
    }

    let agent = state.agent.clone();
    let active = state.research_active.clone();
    let engine = state.engine;
    tokio::spawn(async move {
        match agent.research(&query).await {
            Ok(_) => tracing::info!("{} research run completed", engine),
            Err(e) => tracing::error!("{} research run failed: {}", engine, e),
        }
        active.store(false, Ordering::SeqCst);
    });

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "success": true,
            "engine": state.engine.id(),
            "message": "Research started"
        })),
    )
}
