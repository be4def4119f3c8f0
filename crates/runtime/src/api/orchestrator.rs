//! System orchestration
//!
//! Owns the supervisor, the forum pipeline, and the report compositor, and
//! implements the control operations behind the HTTP surface. System start
//! is single-flight: the `started` / `starting` flags are checked and set
//! under one lock, so concurrent start requests cannot both initialize.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{update_env_values, Settings};
use crate::forum::{ForumHost, ForumLog, LogTailer, TailerConfig, TailerHandle};
use crate::llm::{Completion, LlmGateway};
use crate::report::{ReportCompositor, TaskRecord};
use crate::supervisor::{Supervisor, SupervisorConfig};
use crate::types::{EngineKind, LlmRole, ProcessStatus, ReportError};

#[derive(Debug, Clone, Copy, Default)]
struct SystemState {
    started: bool,
    starting: bool,
}

/// Why a start request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRejection {
    AlreadyStarted,
    Starting,
}

impl StartRejection {
    pub fn message(&self) -> &'static str {
        match self {
            StartRejection::AlreadyStarted => "System already started",
            StartRejection::Starting => "System is starting",
        }
    }
}

/// Detail carried by a failed system start.
#[derive(Debug)]
pub struct SystemStartFailure {
    pub message: String,
    pub logs: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub base_dir: PathBuf,
    pub supervisor: SupervisorConfig,
    pub tailer: TailerConfig,
}

impl OrchestratorConfig {
    pub fn from_settings(_settings: &Settings) -> Self {
        let base_dir = PathBuf::from(".");
        let log_dir = base_dir.join("logs");
        Self {
            base_dir,
            supervisor: SupervisorConfig {
                log_dir: log_dir.clone(),
                ..Default::default()
            },
            tailer: TailerConfig {
                log_dir,
                ..Default::default()
            },
        }
    }
}

/// Composition root: one instance per process owns every long-lived
/// collaborator and injects it where needed.
pub struct Orchestrator {
    settings: Settings,
    config: OrchestratorConfig,
    llm: Arc<dyn Completion>,
    supervisor: Arc<Supervisor>,
    forum: Arc<ForumLog>,
    host: Option<Arc<ForumHost>>,
    tailer: tokio::sync::Mutex<Option<TailerHandle>>,
    compositor: Mutex<Option<Arc<ReportCompositor>>>,
    system: Mutex<SystemState>,
}

impl Orchestrator {
    pub fn new(settings: Settings, config: OrchestratorConfig) -> Self {
        let llm: Arc<dyn Completion> = Arc::new(LlmGateway::new(settings.clone()));
        let forum = Arc::new(ForumLog::new(&config.tailer.log_dir));

        // Without a moderator key the forum runs in pure monitoring mode.
        let host = match settings.role_endpoint(LlmRole::ForumHost) {
            Ok(_) => Some(Arc::new(ForumHost::new(llm.clone()))),
            Err(e) => {
                tracing::warn!("Forum host disabled: {e}");
                None
            }
        };

        Self {
            supervisor: Arc::new(Supervisor::new(config.supervisor.clone())),
            settings,
            llm,
            forum,
            host,
            tailer: tokio::sync::Mutex::new(None),
            compositor: Mutex::new(None),
            system: Mutex::new(SystemState::default()),
            config,
        }
    }

    // ---- system lifecycle -------------------------------------------------

    /// Claim the single start slot. Exactly one concurrent caller succeeds.
    pub fn prepare_start(&self) -> Result<(), StartRejection> {
        let mut state = self.system.lock();
        if state.started {
            return Err(StartRejection::AlreadyStarted);
        }
        if state.starting {
            return Err(StartRejection::Starting);
        }
        state.starting = true;
        Ok(())
    }

    fn finish_start(&self, started: bool) {
        let mut state = self.system.lock();
        state.started = started;
        state.starting = false;
    }

    pub fn system_flags(&self) -> (bool, bool) {
        let state = self.system.lock();
        (state.started, state.starting)
    }

    /// Bring the whole system up: engines, forum monitoring, compositor.
    /// Rolls back started children on any failure.
    pub async fn system_start(&self) -> Result<Vec<String>, SystemStartFailure> {
        self.prepare_start().map_err(|r| SystemStartFailure {
            message: r.message().to_string(),
            logs: Vec::new(),
            errors: Vec::new(),
        })?;

        let result = self.initialize_components().await;
        match result {
            Ok(logs) => {
                self.finish_start(true);
                Ok(logs)
            }
            Err(failure) => {
                self.finish_start(false);
                Err(failure)
            }
        }
    }

    async fn initialize_components(&self) -> Result<Vec<String>, SystemStartFailure> {
        let mut logs = Vec::new();
        let mut errors = Vec::new();

        // Stop the tailer first so the forum log is free for a new session.
        if self.stop_forum().await {
            logs.push("Stopped forum monitoring to avoid file conflicts".to_string());
        }

        for engine in EngineKind::ALL {
            match self.supervisor.start_engine(engine) {
                Ok(()) => {
                    logs.push(format!("{engine}: starting"));
                    let timeout = self.supervisor.system_start_health_timeout();
                    match self.supervisor.wait_for_startup(engine, timeout).await {
                        Ok(()) => logs.push(format!("{engine}: startup successful")),
                        Err(e) => errors.push(format!("{engine} startup failed: {e}")),
                    }
                }
                Err(e) => errors.push(format!("{engine} startup failed: {e}")),
            }
        }

        if errors.is_empty() {
            self.start_forum().await;
            logs.push("Forum monitoring started".to_string());

            match ReportCompositor::new(self.llm.clone(), &self.config.base_dir) {
                Ok(compositor) => {
                    *self.compositor.lock() = Some(Arc::new(compositor));
                    logs.push("Report compositor initialized".to_string());
                }
                Err(e) => errors.push(format!("Report compositor initialization failed: {e}")),
            }
        }

        if !errors.is_empty() {
            self.supervisor.stop_all().await;
            self.stop_forum().await;
            return Err(SystemStartFailure {
                message: "System startup failed".to_string(),
                logs,
                errors,
            });
        }

        Ok(logs)
    }

    // ---- engines ----------------------------------------------------------

    pub async fn start_engine(&self, engine: EngineKind) -> Result<String, String> {
        self.supervisor
            .start_engine(engine)
            .map_err(|e| e.to_string())?;
        let timeout = self.supervisor.single_start_health_timeout();
        match self.supervisor.wait_for_startup(engine, timeout).await {
            Ok(()) => Ok(format!("{engine} application started")),
            Err(e) => Ok(format!("{engine} starting, but startup check failed: {e}")),
        }
    }

    pub async fn stop_engine(&self, engine: EngineKind) -> Result<String, String> {
        self.supervisor
            .stop_engine(engine)
            .await
            .map_err(|e| e.to_string())?;
        Ok(format!("{engine} application stopped"))
    }

    pub async fn engine_statuses(&self) -> BTreeMap<String, (ProcessStatus, u16)> {
        self.supervisor.refresh_status().await;
        self.supervisor
            .statuses()
            .into_iter()
            .map(|(engine, status)| (engine.id().to_string(), (status, engine.api_port())))
            .collect()
    }

    /// Read the full per-engine log (as stamped by the supervisor pump).
    pub fn engine_output(&self, engine: EngineKind) -> Vec<String> {
        let path = self
            .config
            .supervisor
            .log_dir
            .join(format!("{}.log", engine.id()));
        std::fs::read_to_string(path)
            .map(|content| {
                content
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .map(|l| l.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    // ---- search fan-out ---------------------------------------------------

    /// POST the query to every running engine's search endpoint. Stopped
    /// engines are skipped, not waited for.
    pub async fn search_fanout(
        &self,
        query: &str,
    ) -> Result<BTreeMap<String, serde_json::Value>, String> {
        self.supervisor.refresh_status().await;
        let running = self.supervisor.running_engines();
        if running.is_empty() {
            return Err("No running applications".to_string());
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .no_proxy()
            .build()
            .map_err(|e| e.to_string())?;

        let mut results = BTreeMap::new();
        for engine in running {
            let url = format!("http://127.0.0.1:{}/api/search", engine.api_port());
            let outcome = client
                .post(&url)
                .json(&serde_json::json!({ "query": query }))
                .send()
                .await;
            let value = match outcome {
                Ok(response) if response.status().is_success() => response
                    .json()
                    .await
                    .unwrap_or_else(|e| serde_json::json!({ "success": false, "message": e.to_string() })),
                Ok(response) => serde_json::json!({
                    "success": false,
                    "message": format!("API call failed ({})", response.status())
                }),
                Err(e) => serde_json::json!({ "success": false, "message": e.to_string() }),
            };
            results.insert(engine.id().to_string(), value);
        }
        Ok(results)
    }

    // ---- forum ------------------------------------------------------------

    /// Start forum monitoring. Returns false when it is already running.
    pub async fn start_forum(&self) -> bool {
        let mut tailer = self.tailer.lock().await;
        if tailer.is_some() {
            return false;
        }
        let monitor = LogTailer::new(
            self.config.tailer.clone(),
            self.forum.clone(),
            self.host.clone(),
        );
        *tailer = Some(monitor.spawn());
        true
    }

    /// Stop forum monitoring. Returns true when a tailer was running.
    pub async fn stop_forum(&self) -> bool {
        let handle = self.tailer.lock().await.take();
        match handle {
            Some(handle) => {
                handle.stop().await;
                true
            }
            None => false,
        }
    }

    pub async fn forum_running(&self) -> bool {
        self.tailer.lock().await.is_some()
    }

    pub fn forum_log_lines(&self) -> Vec<String> {
        self.forum.read_lines().unwrap_or_default()
    }

    // ---- reports ----------------------------------------------------------

    fn compositor(&self) -> Result<Arc<ReportCompositor>, ReportError> {
        self.compositor
            .lock()
            .clone()
            .ok_or(ReportError::NotInitialized)
    }

    pub fn generate_report(
        &self,
        query: &str,
        custom_template: Option<String>,
    ) -> Result<TaskRecord, ReportError> {
        self.compositor()?.start(query, custom_template)
    }

    pub fn report_progress(&self, task_id: &str) -> Result<Option<TaskRecord>, ReportError> {
        Ok(self.compositor()?.progress(task_id))
    }

    pub fn report_cancel(&self, task_id: &str) -> Result<(), ReportError> {
        self.compositor()?.cancel(task_id)
    }

    pub fn report_ready(&self) -> Result<crate::report::compositor::InputCheck, ReportError> {
        Ok(self.compositor()?.check_input_files())
    }

    pub fn report_templates(&self) -> Result<Vec<(String, String)>, ReportError> {
        Ok(self.compositor()?.template_catalog())
    }

    // ---- configuration ----------------------------------------------------

    pub fn config_values(&self) -> BTreeMap<String, String> {
        // Re-read so updates made through the API are reflected.
        Settings::load_from(self.settings.env_file()).exposed_values()
    }

    pub fn update_config(
        &self,
        updates: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, String> {
        update_env_values(self.settings.env_file(), updates).map_err(|e| e.to_string())?;
        Ok(self.config_values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn orchestrator(dir: &std::path::Path, worker: (&str, &[&str])) -> Arc<Orchestrator> {
        let settings = Settings::load_from(&dir.join(".env"));
        let log_dir = dir.join("logs");
        let config = OrchestratorConfig {
            base_dir: dir.to_path_buf(),
            supervisor: SupervisorConfig {
                log_dir: log_dir.clone(),
                system_start_health_timeout: Duration::from_millis(300),
                single_start_health_timeout: Duration::from_millis(300),
                stop_grace: Duration::from_millis(200),
                worker_command: Some((
                    worker.0.to_string(),
                    worker.1.iter().map(|s| s.to_string()).collect(),
                )),
            },
            tailer: TailerConfig {
                log_dir,
                ..Default::default()
            },
        };
        Arc::new(Orchestrator::new(settings, config))
    }

    #[tokio::test]
    async fn start_is_single_flight() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), ("true", &[]));

        assert!(orch.prepare_start().is_ok());
        assert_eq!(orch.prepare_start(), Err(StartRejection::Starting));

        orch.finish_start(true);
        assert_eq!(orch.prepare_start(), Err(StartRejection::AlreadyStarted));
        assert_eq!(orch.system_flags(), (true, false));
    }

    #[tokio::test]
    async fn concurrent_system_starts_admit_exactly_one() {
        let dir = tempfile::tempdir().unwrap();
        // Workers die instantly, so the admitted start fails after reaching
        // the supervisor; the other must be rejected at the gate.
        let orch = orchestrator(dir.path(), ("true", &[]));

        let (first, second) = tokio::join!(orch.system_start(), orch.system_start());
        let failures = [first.unwrap_err(), second.unwrap_err()];

        let gate_rejections = failures
            .iter()
            .filter(|f| f.message == "System is starting")
            .count();
        let supervisor_failures = failures
            .iter()
            .filter(|f| f.message == "System startup failed")
            .count();
        assert_eq!(gate_rejections, 1);
        assert_eq!(supervisor_failures, 1);

        // The failed start must have rolled the flags back.
        assert_eq!(orch.system_flags(), (false, false));
    }

    #[tokio::test]
    async fn failed_start_reports_per_engine_errors_and_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), ("true", &[]));

        let failure = orch.system_start().await.unwrap_err();
        assert_eq!(failure.errors.len(), 3);
        for engine in EngineKind::ALL {
            assert_eq!(
                orch.supervisor.status_of(engine),
                ProcessStatus::Stopped
            );
        }
    }

    #[tokio::test]
    async fn fanout_without_running_engines_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), ("true", &[]));
        let err = orch.search_fanout("query").await.unwrap_err();
        assert_eq!(err, "No running applications");
    }

    #[tokio::test]
    async fn forum_monitoring_toggles() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), ("true", &[]));

        assert!(orch.start_forum().await);
        assert!(orch.forum_running().await);
        assert!(!orch.start_forum().await);

        assert!(orch.stop_forum().await);
        assert!(!orch.forum_running().await);
        assert!(!orch.stop_forum().await);
    }

    #[tokio::test]
    async fn report_operations_require_initialization() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), ("true", &[]));
        assert!(matches!(
            orch.generate_report("q", None),
            Err(ReportError::NotInitialized)
        ));
    }
}
