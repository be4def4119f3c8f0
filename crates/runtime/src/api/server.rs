//! Orchestrator HTTP server

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::orchestrator::Orchestrator;
use super::routes;
use crate::types::RuntimeError;

/// Serves the orchestrator control surface.
pub struct OrchestratorServer {
    orchestrator: Arc<Orchestrator>,
}

impl OrchestratorServer {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Bind and serve until the process exits.
    pub async fn start(&self, host: &str, port: u16) -> Result<(), RuntimeError> {
        let app = self.router();
        let addr = format!("{host}:{port}");
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RuntimeError::Internal(format!("Failed to bind to {addr}: {e}")))?;

        tracing::info!("Orchestrator API listening on {addr}");
        axum::serve(listener, app)
            .await
            .map_err(|e| RuntimeError::Internal(format!("Server error: {e}")))
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/status", get(routes::get_status))
            .route("/api/system/status", get(routes::get_system_status))
            .route("/api/system/start", post(routes::start_system))
            .route("/api/start/:engine", get(routes::start_engine))
            .route("/api/stop/:engine", get(routes::stop_engine))
            .route("/api/output/:engine", get(routes::get_output))
            .route("/api/search", post(routes::search))
            .route("/api/forum/start", get(routes::start_forum))
            .route("/api/forum/stop", get(routes::stop_forum))
            .route("/api/forum/log", get(routes::get_forum_log))
            .route("/api/config", get(routes::get_config).post(routes::update_config))
            .route("/api/report/status", get(routes::report_status))
            .route("/api/report/generate", post(routes::generate_report))
            .route("/api/report/progress/:task_id", get(routes::report_progress))
            .route("/api/report/result/:task_id", get(routes::report_result))
            .route(
                "/api/report/result/:task_id/json",
                get(routes::report_result_json),
            )
            .route("/api/report/cancel/:task_id", post(routes::report_cancel))
            .route("/api/report/templates", get(routes::report_templates))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.orchestrator.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::OrchestratorConfig;
    use crate::config::Settings;
    use crate::forum::TailerConfig;
    use crate::supervisor::SupervisorConfig;
    use std::time::Duration;

    async fn serve(dir: &std::path::Path) -> std::net::SocketAddr {
        let settings = Settings::load_from(&dir.join(".env"));
        let log_dir = dir.join("logs");
        let config = OrchestratorConfig {
            base_dir: dir.to_path_buf(),
            supervisor: SupervisorConfig {
                log_dir: log_dir.clone(),
                system_start_health_timeout: Duration::from_millis(200),
                single_start_health_timeout: Duration::from_millis(200),
                stop_grace: Duration::from_millis(200),
                worker_command: Some(("true".to_string(), Vec::new())),
            },
            tailer: TailerConfig {
                log_dir,
                ..Default::default()
            },
        };
        let orchestrator = Arc::new(Orchestrator::new(settings, config));
        let server = OrchestratorServer::new(orchestrator);
        let app = server.router();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn status_reports_all_engines_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let addr = serve(dir.path()).await;

        let body: serde_json::Value = reqwest::get(format!("http://{addr}/api/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["success"], true);
        for engine in ["query", "media", "insight"] {
            assert_eq!(body["engines"][engine]["status"], "stopped");
        }
        assert_eq!(body["forum"]["status"], "stopped");
    }

    #[tokio::test]
    async fn unknown_engine_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let addr = serve(dir.path()).await;

        let response = reqwest::get(format!("http://{addr}/api/start/forum2"))
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn search_without_engines_returns_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let addr = serve(dir.path()).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{addr}/api/search"))
            .json(&serde_json::json!({ "query": "storm" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 409);
    }

    #[tokio::test]
    async fn config_round_trip_through_the_api() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "PORT=5001\n").unwrap();
        let addr = serve(dir.path()).await;

        let client = reqwest::Client::new();
        let update: serde_json::Value = client
            .post(format!("http://{addr}/api/config"))
            .json(&serde_json::json!({ "HOST": "127.0.0.1", "BOGUS": "x" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(update["success"], true);
        assert_eq!(update["config"]["HOST"], "127.0.0.1");

        let fetched: serde_json::Value = client
            .get(format!("http://{addr}/api/config"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(fetched["config"]["HOST"], "127.0.0.1");
        assert!(fetched["config"]["BOGUS"].is_null());
    }

    #[tokio::test]
    async fn report_endpoints_surface_uninitialized_state() {
        let dir = tempfile::tempdir().unwrap();
        let addr = serve(dir.path()).await;

        let client = reqwest::Client::new();
        let status: serde_json::Value = client
            .get(format!("http://{addr}/api/report/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["initialized"], false);

        let response = client
            .post(format!("http://{addr}/api/report/generate"))
            .json(&serde_json::json!({ "query": "anything" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 500);
    }
}
