//! Engine process supervisor
//!
//! Launches each engine worker as a child process with a normalized
//! environment, pumps its output into the per-engine log file with a
//! wall-clock stamp on every line, polls worker health over loopback HTTP,
//! and stops children politely (grace window, then force kill).

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use chrono::Local;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::types::{EngineKind, ProcessStatus, SupervisorError};

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub log_dir: PathBuf,
    /// Health ceiling during full system start.
    pub system_start_health_timeout: Duration,
    /// Health ceiling for an individual engine start.
    pub single_start_health_timeout: Duration,
    /// Grace window between polite terminate and force kill.
    pub stop_grace: Duration,
    /// Worker executable and leading arguments. Defaults to this binary's
    /// `engine` subcommand.
    pub worker_command: Option<(String, Vec<String>)>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            system_start_health_timeout: Duration::from_secs(30),
            single_start_health_timeout: Duration::from_secs(15),
            stop_grace: Duration::from_secs(5),
            worker_command: None,
        }
    }
}

struct ProcessEntry {
    child: Option<Child>,
    status: ProcessStatus,
}

impl Default for ProcessEntry {
    fn default() -> Self {
        Self {
            child: None,
            status: ProcessStatus::Stopped,
        }
    }
}

/// Supervises the three engine worker processes.
pub struct Supervisor {
    config: SupervisorConfig,
    entries: Mutex<HashMap<EngineKind, ProcessEntry>>,
    http: reqwest::Client,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .no_proxy()
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
            http,
        }
    }

    fn log_path(&self, engine: EngineKind) -> PathBuf {
        self.config.log_dir.join(format!("{}.log", engine.id()))
    }

    fn build_command(&self, engine: EngineKind) -> Command {
        let (program, args) = match &self.config.worker_command {
            Some((program, args)) => (program.clone(), args.clone()),
            None => {
                let exe = std::env::current_exe()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|_| "tidewave".to_string());
                (exe, vec!["engine".to_string()])
            }
        };

        let mut command = Command::new(program);
        command.args(args);
        command.arg("--engine").arg(engine.id());
        command.arg("--port").arg(engine.api_port().to_string());

        // Normalized environment: UTF-8 locale, plain output.
        command.env("LANG", "en_US.UTF-8");
        command.env("LC_ALL", "en_US.UTF-8");
        command.env("NO_COLOR", "1");

        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command
    }

    fn append_log_line(log_path: &PathBuf, line: &str) {
        use std::io::Write;
        let stamped = format!("[{}] {}", Local::now().format("%H:%M:%S"), line);
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .and_then(|mut file| writeln!(file, "{stamped}"));
        if let Err(e) = result {
            tracing::error!("Error writing log {}: {e}", log_path.display());
        }
    }

    fn spawn_pump<R>(reader: R, log_path: PathBuf)
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim_end();
                if !line.is_empty() {
                    Self::append_log_line(&log_path, line);
                }
            }
        });
    }

    /// Spawn one engine worker and start pumping its output.
    pub fn start_engine(&self, engine: EngineKind) -> Result<(), SupervisorError> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(engine).or_default();
        if entry.child.is_some() {
            return Err(SupervisorError::AlreadyRunning(engine));
        }

        std::fs::create_dir_all(&self.config.log_dir)
            .map_err(|e| SupervisorError::SpawnFailed { engine, source: e })?;

        // Fresh log per run so the tailer's session gate sees a truncation.
        let log_path = self.log_path(engine);
        if log_path.exists() {
            let _ = std::fs::remove_file(&log_path);
        }
        Self::append_log_line(&log_path, &format!("Starting {} application...", engine.id()));

        let mut child = self
            .build_command(engine)
            .spawn()
            .map_err(|e| SupervisorError::SpawnFailed { engine, source: e })?;

        if let Some(stdout) = child.stdout.take() {
            Self::spawn_pump(stdout, log_path.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            Self::spawn_pump(stderr, log_path);
        }

        entry.child = Some(child);
        entry.status = ProcessStatus::Starting;
        tracing::info!("{} engine starting", engine);
        Ok(())
    }

    async fn health_ok(&self, engine: EngineKind) -> bool {
        let url = format!("http://127.0.0.1:{}/health", engine.api_port());
        matches!(
            self.http.get(&url).send().await,
            Ok(response) if response.status().is_success()
        )
    }

    /// Poll until the worker answers its health check or the deadline
    /// passes. Transitions `starting -> running` on the first 200.
    pub async fn wait_for_startup(
        &self,
        engine: EngineKind,
        timeout: Duration,
    ) -> Result<(), SupervisorError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let exited = {
                let mut entries = self.entries.lock();
                match entries.get_mut(&engine).and_then(|e| e.child.as_mut()) {
                    Some(child) => child.try_wait().ok().flatten().is_some(),
                    None => true,
                }
            };
            if exited {
                self.mark_stopped(engine);
                return Err(SupervisorError::StartupFailed {
                    engine,
                    reason: "process exited during startup".to_string(),
                });
            }

            if self.health_ok(engine).await {
                if let Some(entry) = self.entries.lock().get_mut(&engine) {
                    entry.status = ProcessStatus::Running;
                }
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(SupervisorError::StartupFailed {
                    engine,
                    reason: format!("no healthy response within {timeout:?}"),
                });
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    fn mark_stopped(&self, engine: EngineKind) {
        if let Some(entry) = self.entries.lock().get_mut(&engine) {
            entry.child = None;
            entry.status = ProcessStatus::Stopped;
        }
    }

    /// Polite stop: terminate, wait out the grace window, then force kill.
    pub async fn stop_engine(&self, engine: EngineKind) -> Result<(), SupervisorError> {
        let child = {
            let mut entries = self.entries.lock();
            match entries.get_mut(&engine) {
                Some(entry) => entry.child.take(),
                None => None,
            }
        };
        let Some(mut child) = child else {
            return Err(SupervisorError::NotRunning(engine));
        };

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }

        match tokio::time::timeout(self.config.stop_grace, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                tracing::warn!("{} did not exit within grace window, killing", engine);
                let _ = child.kill().await;
                let _ = child.wait().await;
            }
        }

        self.mark_stopped(engine);
        tracing::info!("{} engine stopped", engine);
        Ok(())
    }

    /// Stop every running engine; used during rollback and shutdown.
    pub async fn stop_all(&self) {
        for engine in EngineKind::ALL {
            if self.stop_engine(engine).await.is_ok() {
                tracing::info!("{} stopped during cleanup", engine);
            }
        }
    }

    /// Refresh statuses: reap exited children and health-check live ones.
    pub async fn refresh_status(&self) {
        for engine in EngineKind::ALL {
            let has_child = {
                let mut entries = self.entries.lock();
                match entries.get_mut(&engine) {
                    Some(entry) => match entry.child.as_mut() {
                        Some(child) => {
                            if child.try_wait().ok().flatten().is_some() {
                                entry.child = None;
                                entry.status = ProcessStatus::Stopped;
                                false
                            } else {
                                true
                            }
                        }
                        None => false,
                    },
                    None => false,
                }
            };

            if has_child {
                let healthy = self.health_ok(engine).await;
                if let Some(entry) = self.entries.lock().get_mut(&engine) {
                    entry.status = if healthy {
                        ProcessStatus::Running
                    } else {
                        ProcessStatus::Starting
                    };
                }
            }
        }
    }

    pub fn status_of(&self, engine: EngineKind) -> ProcessStatus {
        self.entries
            .lock()
            .get(&engine)
            .map(|e| e.status)
            .unwrap_or(ProcessStatus::Stopped)
    }

    /// Engines currently reported as running.
    pub fn running_engines(&self) -> Vec<EngineKind> {
        EngineKind::ALL
            .into_iter()
            .filter(|engine| self.status_of(*engine) == ProcessStatus::Running)
            .collect()
    }

    pub fn statuses(&self) -> HashMap<EngineKind, ProcessStatus> {
        EngineKind::ALL
            .into_iter()
            .map(|engine| (engine, self.status_of(engine)))
            .collect()
    }

    pub fn single_start_health_timeout(&self) -> Duration {
        self.config.single_start_health_timeout
    }

    pub fn system_start_health_timeout(&self) -> Duration {
        self.config.system_start_health_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor_with_command(dir: &std::path::Path, program: &str, args: &[&str]) -> Supervisor {
        Supervisor::new(SupervisorConfig {
            log_dir: dir.to_path_buf(),
            stop_grace: Duration::from_millis(200),
            worker_command: Some((
                program.to_string(),
                args.iter().map(|s| s.to_string()).collect(),
            )),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn output_is_stamped_and_written_to_the_engine_log() {
        let dir = tempfile::tempdir().unwrap();
        // `echo` ignores the --engine/--port args appended by the supervisor.
        let supervisor = supervisor_with_command(dir.path(), "echo", &["engine-output"]);
        supervisor.start_engine(EngineKind::Query).unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        let content = std::fs::read_to_string(dir.path().join("query.log")).unwrap();
        assert!(content.contains("Starting query application..."));
        let output_line = content
            .lines()
            .find(|l| l.contains("engine-output"))
            .expect("child output should be pumped into the log");
        assert!(output_line.starts_with('['), "line not stamped: {output_line}");
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        // Trailing --engine/--port args land in the script's ignored
        // positional parameters.
        let supervisor = supervisor_with_command(dir.path(), "sh", &["-c", "sleep 5", "sh"]);
        supervisor.start_engine(EngineKind::Media).unwrap();
        assert!(matches!(
            supervisor.start_engine(EngineKind::Media),
            Err(SupervisorError::AlreadyRunning(EngineKind::Media))
        ));
        supervisor.stop_engine(EngineKind::Media).await.unwrap();
    }

    #[tokio::test]
    async fn stop_terminates_within_grace_window() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor_with_command(dir.path(), "sh", &["-c", "sleep 30", "sh"]);
        supervisor.start_engine(EngineKind::Insight).unwrap();
        assert_eq!(
            supervisor.status_of(EngineKind::Insight),
            ProcessStatus::Starting
        );

        supervisor.stop_engine(EngineKind::Insight).await.unwrap();
        assert_eq!(
            supervisor.status_of(EngineKind::Insight),
            ProcessStatus::Stopped
        );
    }

    #[tokio::test]
    async fn stopping_a_stopped_engine_errors() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor_with_command(dir.path(), "true", &[]);
        assert!(matches!(
            supervisor.stop_engine(EngineKind::Query).await,
            Err(SupervisorError::NotRunning(EngineKind::Query))
        ));
    }

    #[tokio::test]
    async fn exited_children_are_reaped_on_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor_with_command(dir.path(), "true", &[]);
        supervisor.start_engine(EngineKind::Query).unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        supervisor.refresh_status().await;
        assert_eq!(
            supervisor.status_of(EngineKind::Query),
            ProcessStatus::Stopped
        );
    }

    #[tokio::test]
    async fn startup_wait_fails_fast_when_the_process_dies() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor_with_command(dir.path(), "true", &[]);
        supervisor.start_engine(EngineKind::Media).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let err = supervisor
            .wait_for_startup(EngineKind::Media, Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::StartupFailed { .. }));
    }
}
