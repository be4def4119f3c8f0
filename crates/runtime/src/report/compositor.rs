//! Single-task final report compositor
//!
//! One task at a time by construction: a start request while a task is
//! running is rejected, and a finished task is cleared at the next start.
//! Progress moves through fixed checkpoints (10/30/50/90/100) that the UI
//! polls; a cancelled task's worker keeps running but its output is
//! discarded.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use super::baseline::FileCountBaseline;
use crate::llm::{repair, Completion};
use crate::prompts;
use crate::types::{
    sanitize_query_for_filename, EngineKind, LlmRole, ReportError, TaskId,
};

const DEFAULT_TEMPLATE_NAME: &str = "Social Public Hotspot Event Analysis Report Template";

const DEFAULT_TEMPLATE: &str = r#"# Social Public Hotspot Event Analysis Report

## Executive Summary
Comprehensive analysis of the event, integrating viewpoints and data from all engines.

## Event Overview
- Nature, timeline, and scope of the event

## Public Opinion Trend Analysis
- Overall trend and main opinion distribution

## Media Coverage Analysis
- Mainstream media attitude and coverage focus

## Social Impact Assessment
- Direct and potential impact

## Response Recommendations
- Immediate actions and long-term strategy

## Conclusions and Outlook
"#;

const REPORT_EXCERPT_CHARS: usize = 1000;
const FORUM_EXCERPT_CHARS: usize = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Error,
    Cancelled,
}

/// Source of truth for progress polling.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub query: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub html_content: String,
    pub report_file_name: String,
    pub report_file_path: String,
    pub report_file_relative_path: String,
    pub state_file_path: String,
    pub state_file_relative_path: String,
}

impl TaskRecord {
    fn new(query: &str) -> Self {
        let now = Utc::now();
        Self {
            task_id: TaskId::new().to_string(),
            query: query.to_string(),
            status: TaskStatus::Pending,
            progress: 0,
            error_message: String::new(),
            created_at: now,
            updated_at: now,
            html_content: String::new(),
            report_file_name: String::new(),
            report_file_path: String::new(),
            report_file_relative_path: String::new(),
            state_file_path: String::new(),
            state_file_relative_path: String::new(),
        }
    }

    /// Polling envelope.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "task_id": self.task_id,
            "query": self.query,
            "status": self.status,
            "progress": self.progress,
            "error_message": self.error_message,
            "created_at": self.created_at.to_rfc3339(),
            "updated_at": self.updated_at.to_rfc3339(),
            "has_result": !self.html_content.is_empty(),
            "report_file_ready": !self.report_file_path.is_empty(),
            "report_file_name": self.report_file_name,
            "report_file_path": self.report_file_relative_path,
        })
    }
}

/// Readiness report combining the baseline check with the forum log.
#[derive(Debug, Clone)]
pub struct InputCheck {
    pub ready: bool,
    pub files_found: Vec<String>,
    pub missing_files: Vec<String>,
    pub latest_files: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
struct CompositorStateFile {
    query: String,
    template_used: String,
    status: String,
    generated_at: DateTime<Utc>,
    generation_time_seconds: f64,
    html_content: String,
}

struct SelectedTemplate {
    name: String,
    content: String,
    reason: String,
}

/// Composes the final HTML report from the latest engine artifacts and the
/// forum transcript.
pub struct ReportCompositor {
    llm: Arc<dyn Completion>,
    baseline: FileCountBaseline,
    /// Directory containing the engine report directories.
    base_dir: PathBuf,
    template_dir: PathBuf,
    output_dir: PathBuf,
    log_dir: PathBuf,
    current: Arc<Mutex<Option<TaskRecord>>>,
}

impl ReportCompositor {
    /// Construct the compositor and capture the artifact-count baseline.
    pub fn new(llm: Arc<dyn Completion>, base_dir: &Path) -> Result<Self, ReportError> {
        let log_dir = base_dir.join("logs");
        let compositor = Self {
            llm,
            baseline: FileCountBaseline::new(&log_dir),
            base_dir: base_dir.to_path_buf(),
            template_dir: base_dir.join("report_templates"),
            output_dir: base_dir.join("final_reports"),
            log_dir,
            current: Arc::new(Mutex::new(None)),
        };
        compositor
            .baseline
            .initialize_baseline(&compositor.directories())?;
        Ok(compositor)
    }

    fn directories(&self) -> BTreeMap<String, PathBuf> {
        EngineKind::ALL
            .iter()
            .map(|engine| {
                (
                    engine.id().to_string(),
                    self.base_dir.join(engine.reports_dir()),
                )
            })
            .collect()
    }

    /// Re-capture the baseline (used when a new analysis round begins).
    pub fn reset_baseline(&self) -> Result<(), ReportError> {
        self.baseline.initialize_baseline(&self.directories())?;
        Ok(())
    }

    /// Check whether every engine has fresh output and the forum log exists.
    pub fn check_input_files(&self) -> InputCheck {
        let directories = self.directories();
        let check = self.baseline.check_new_files(&directories);
        let forum_path = self.log_dir.join("forum.log");
        let forum_ready = forum_path.exists();

        let mut files_found = Vec::new();
        let mut missing_files = Vec::new();
        for (engine, delta) in &check.new_files_found {
            let current = check.current_counts[engine];
            let base = check.baseline_counts.get(engine).copied().unwrap_or(0);
            if *delta > 0 {
                files_found.push(format!("{engine}: {current} files (added {delta} new)"));
            } else {
                missing_files.push(format!(
                    "{engine}: {current} files (baseline {base}, no new files)"
                ));
            }
        }
        if forum_ready {
            files_found.push("forum: forum.log".to_string());
        } else {
            missing_files.push("forum: log file does not exist".to_string());
        }

        let ready = check.ready && forum_ready;
        let mut latest_files = BTreeMap::new();
        if ready {
            latest_files = self.baseline.get_latest_files(&directories);
            latest_files.insert("forum".to_string(), forum_path);
        }

        InputCheck {
            ready,
            files_found,
            missing_files,
            latest_files,
        }
    }

    /// Start a generation task. Single-task: rejects while one is running,
    /// clears a finished one.
    pub fn start(
        self: &Arc<Self>,
        query: &str,
        custom_template: Option<String>,
    ) -> Result<TaskRecord, ReportError> {
        {
            let mut current = self.current.lock();
            if let Some(task) = current.as_ref() {
                match task.status {
                    TaskStatus::Running | TaskStatus::Pending => {
                        return Err(ReportError::AlreadyRunning)
                    }
                    _ => *current = None,
                }
            }
        }

        let check = self.check_input_files();
        if !check.ready {
            return Err(ReportError::NotReady {
                missing: check.missing_files,
            });
        }

        let record = TaskRecord::new(query);
        let snapshot = record.clone();
        *self.current.lock() = Some(record);

        let compositor = self.clone();
        let task_id = snapshot.task_id.clone();
        let query = query.to_string();
        tokio::spawn(async move {
            if let Err(e) = compositor
                .run_generation(&task_id, &query, custom_template, check.latest_files)
                .await
            {
                tracing::error!("Report generation failed: {e}");
                compositor.update_task(&task_id, |task| {
                    task.status = TaskStatus::Error;
                    task.error_message = e.to_string();
                });
            }
        });

        Ok(snapshot)
    }

    /// Snapshot of the task with this id, if it is still the current one.
    pub fn progress(&self, task_id: &str) -> Option<TaskRecord> {
        self.current
            .lock()
            .as_ref()
            .filter(|task| task.task_id == task_id)
            .cloned()
    }

    /// Cancel the current task. The worker is not killed; its output is
    /// discarded because the record is gone.
    pub fn cancel(&self, task_id: &str) -> Result<(), ReportError> {
        let mut current = self.current.lock();
        match current.as_mut() {
            Some(task) if task.task_id == task_id => {
                if task.status == TaskStatus::Running {
                    task.status = TaskStatus::Cancelled;
                    task.error_message = "Task cancelled by user".to_string();
                }
                *current = None;
                Ok(())
            }
            _ => Err(ReportError::UnknownTask(task_id.to_string())),
        }
    }

    /// Apply a mutation iff the task is still current and not cancelled.
    fn update_task(&self, task_id: &str, mutate: impl FnOnce(&mut TaskRecord)) -> bool {
        let mut current = self.current.lock();
        match current.as_mut() {
            Some(task) if task.task_id == task_id && task.status != TaskStatus::Cancelled => {
                mutate(task);
                task.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    async fn run_generation(
        &self,
        task_id: &str,
        query: &str,
        custom_template: Option<String>,
        latest_files: BTreeMap<String, PathBuf>,
    ) -> Result<(), ReportError> {
        let started = std::time::Instant::now();

        if !self.update_task(task_id, |task| {
            task.status = TaskStatus::Running;
            task.progress = 10;
        }) {
            return Ok(()); // cancelled before it began
        }

        // Load the three artifacts plus the forum transcript.
        let (reports, forum_logs) = self.load_input_files(&latest_files);
        if !self.update_task(task_id, |task| task.progress = 30) {
            return Ok(());
        }

        // Template selection.
        let template = self
            .select_template(query, &reports, &forum_logs, custom_template)
            .await;
        tracing::info!(
            "Selected template: {} ({})",
            template.name,
            template.reason
        );
        if !self.update_task(task_id, |task| task.progress = 50) {
            return Ok(());
        }

        // HTML generation.
        let html = self
            .generate_html(query, &reports, &forum_logs, &template)
            .await
            .map_err(ReportError::Generation)?;
        if !self.update_task(task_id, |task| {
            task.progress = 90;
            task.html_content = html.clone();
        }) {
            return Ok(());
        }

        // Persist HTML and the state JSON.
        let saved = self.save_report(query, &template.name, &html, started.elapsed())?;
        self.update_task(task_id, |task| {
            task.status = TaskStatus::Completed;
            task.progress = 100;
            task.report_file_name = saved.report_file_name.clone();
            task.report_file_path = saved.report_file_path.clone();
            task.report_file_relative_path = saved.report_file_relative_path.clone();
            task.state_file_path = saved.state_file_path.clone();
            task.state_file_relative_path = saved.state_file_relative_path.clone();
        });
        Ok(())
    }

    fn load_input_files(
        &self,
        latest_files: &BTreeMap<String, PathBuf>,
    ) -> (Vec<String>, String) {
        let mut reports = Vec::new();
        for engine in ["query", "media", "insight"] {
            let content = latest_files
                .get(engine)
                .and_then(|path| std::fs::read_to_string(path).ok())
                .unwrap_or_default();
            tracing::info!("Loaded {} report: {} characters", engine, content.len());
            reports.push(content);
        }

        let forum_logs = latest_files
            .get("forum")
            .and_then(|path| std::fs::read_to_string(path).ok())
            .unwrap_or_default();
        (reports, forum_logs)
    }

    fn available_templates(&self) -> Vec<(String, String)> {
        std::fs::read_dir(&self.template_dir)
            .ok()
            .into_iter()
            .flatten()
            .flatten()
            .filter(|entry| entry.path().extension().and_then(|e| e.to_str()) == Some("md"))
            .filter_map(|entry| {
                let name = entry.path().file_stem()?.to_str()?.to_string();
                let content = std::fs::read_to_string(entry.path()).ok()?;
                Some((name, content))
            })
            .collect()
    }

    /// Template listing for the API: `(name, first-line description)`.
    pub fn template_catalog(&self) -> Vec<(String, String)> {
        self.available_templates()
            .into_iter()
            .map(|(name, content)| {
                let description = content.lines().next().unwrap_or("No description").to_string();
                (name, description)
            })
            .collect()
    }

    async fn select_template(
        &self,
        query: &str,
        reports: &[String],
        forum_logs: &str,
        custom_template: Option<String>,
    ) -> SelectedTemplate {
        if let Some(custom) = custom_template.filter(|t| !t.trim().is_empty()) {
            return SelectedTemplate {
                name: "custom".to_string(),
                content: custom,
                reason: "User-specified custom template".to_string(),
            };
        }

        let templates = self.available_templates();
        if templates.is_empty() {
            // No template directory: the generator free-styles.
            return SelectedTemplate {
                name: "freestyle".to_string(),
                content: String::new(),
                reason: "No templates available".to_string(),
            };
        }

        let template_list = templates
            .iter()
            .map(|(name, content)| {
                format!("- {name}: {}", content.lines().next().unwrap_or_default())
            })
            .collect::<Vec<_>>()
            .join("\n");
        let reports_excerpt = reports
            .iter()
            .enumerate()
            .map(|(i, r)| format!("Report {}:\n{}", i + 1, excerpt(r, REPORT_EXCERPT_CHARS)))
            .collect::<Vec<_>>()
            .join("\n\n");
        let user = format!(
            "Query: {query}\n\n{reports_excerpt}\n\nForum discussion excerpt:\n{}\n\n\
             Available templates:\n{template_list}\n\n\
             Select the most appropriate template.",
            excerpt(forum_logs, FORUM_EXCERPT_CHARS)
        );

        let fallback = || SelectedTemplate {
            name: DEFAULT_TEMPLATE_NAME.to_string(),
            content: DEFAULT_TEMPLATE.to_string(),
            reason: "Template selection failed, using default template".to_string(),
        };

        let raw = match self
            .llm
            .complete(LlmRole::ReportEngine, prompts::TEMPLATE_SELECTION, &user)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Template selection failed: {e}");
                return fallback();
            }
        };

        let Some(value) = repair::extract_json(&raw) else {
            return fallback();
        };
        let chosen = value
            .get("template_name")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let reason = value
            .get("selection_reason")
            .and_then(|v| v.as_str())
            .unwrap_or("No reason given")
            .to_string();

        match templates.iter().find(|(name, _)| name == chosen) {
            Some((name, content)) => SelectedTemplate {
                name: name.clone(),
                content: content.clone(),
                reason,
            },
            None => {
                tracing::warn!("Template selection returned unknown name: {chosen}");
                fallback()
            }
        }
    }

    async fn generate_html(
        &self,
        query: &str,
        reports: &[String],
        forum_logs: &str,
        template: &SelectedTemplate,
    ) -> Result<String, String> {
        let user = serde_json::json!({
            "query": query,
            "query_engine_report": reports.first().cloned().unwrap_or_default(),
            "media_engine_report": reports.get(1).cloned().unwrap_or_default(),
            "insight_engine_report": reports.get(2).cloned().unwrap_or_default(),
            "forum_logs": forum_logs,
            "selected_template": template.content,
        })
        .to_string();

        let raw = self
            .llm
            .complete(LlmRole::ReportEngine, prompts::HTML_GENERATION, &user)
            .await
            .map_err(|e| format!("HTML generation failed: {e}"))?;

        let html = repair::extract_text(&raw);
        if html.is_empty() {
            return Err("HTML generation produced no content".to_string());
        }
        Ok(html)
    }

    fn save_report(
        &self,
        query: &str,
        template_name: &str,
        html: &str,
        elapsed: std::time::Duration,
    ) -> Result<SavedReport, ReportError> {
        std::fs::create_dir_all(&self.output_dir).map_err(ReportError::Persist)?;

        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let query_safe = sanitize_query_for_filename(query);

        let report_file_name = format!("final_report_{query_safe}_{timestamp}.html");
        let report_path = self.output_dir.join(&report_file_name);
        std::fs::write(&report_path, html).map_err(ReportError::Persist)?;

        let state = CompositorStateFile {
            query: query.to_string(),
            template_used: template_name.to_string(),
            status: "completed".to_string(),
            generated_at: Utc::now(),
            generation_time_seconds: elapsed.as_secs_f64(),
            html_content: html.to_string(),
        };
        let state_file_name = format!("report_state_{query_safe}_{timestamp}.json");
        let state_path = self.output_dir.join(&state_file_name);
        let state_json = serde_json::to_string_pretty(&state)
            .map_err(|e| ReportError::Generation(e.to_string()))?;
        std::fs::write(&state_path, state_json).map_err(ReportError::Persist)?;

        let absolute = |p: &Path| {
            p.canonicalize()
                .unwrap_or_else(|_| p.to_path_buf())
                .display()
                .to_string()
        };
        let relative = |p: &Path| {
            p.strip_prefix(&self.base_dir)
                .unwrap_or(p)
                .display()
                .to_string()
        };

        tracing::info!("Report saved to: {}", report_path.display());
        Ok(SavedReport {
            report_file_name,
            report_file_path: absolute(&report_path),
            report_file_relative_path: relative(&report_path),
            state_file_path: absolute(&state_path),
            state_file_relative_path: relative(&state_path),
        })
    }

}

struct SavedReport {
    report_file_name: String,
    report_file_path: String,
    report_file_relative_path: String,
    state_file_path: String,
    state_file_relative_path: String,
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...(content truncated)")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Completion;
    use crate::types::LlmError;
    use async_trait::async_trait;

    struct ScriptedLlm {
        responses: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Completion for ScriptedLlm {
        async fn complete(
            &self,
            _role: LlmRole,
            _system: &str,
            _user: &str,
        ) -> Result<String, LlmError> {
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                Err(LlmError::EmptyResponse)
            } else {
                Ok(responses.remove(0))
            }
        }
    }

    fn seed_engine_reports(base: &Path) {
        for engine in EngineKind::ALL {
            let dir = base.join(engine.reports_dir());
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("old.md"), "baseline report").unwrap();
        }
    }

    fn make_ready(base: &Path) {
        for engine in EngineKind::ALL {
            let dir = base.join(engine.reports_dir());
            std::fs::write(dir.join("fresh.md"), format!("# {} report", engine.id())).unwrap();
        }
        std::fs::create_dir_all(base.join("logs")).unwrap();
        std::fs::write(
            base.join("logs/forum.log"),
            "[12:00:00] [QUERY] discussion line\n",
        )
        .unwrap();
    }

    fn compositor(base: &Path, responses: Vec<String>) -> Arc<ReportCompositor> {
        Arc::new(
            ReportCompositor::new(
                Arc::new(ScriptedLlm {
                    responses: Mutex::new(responses),
                }),
                base,
            )
            .unwrap(),
        )
    }

    async fn wait_for_terminal(compositor: &ReportCompositor, task_id: &str) -> TaskRecord {
        for _ in 0..200 {
            if let Some(task) = compositor.progress(task_id) {
                if matches!(
                    task.status,
                    TaskStatus::Completed | TaskStatus::Error | TaskStatus::Cancelled
                ) {
                    return task;
                }
            } else {
                panic!("task disappeared before reaching a terminal state");
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("task did not finish in time");
    }

    #[tokio::test]
    async fn rejects_start_until_every_engine_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        seed_engine_reports(dir.path());
        let compositor = compositor(dir.path(), Vec::new());

        let err = compositor.start("topic", None).unwrap_err();
        match err {
            ReportError::NotReady { missing } => {
                // three engines plus the missing forum log
                assert_eq!(missing.len(), 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn full_generation_persists_html_and_state() {
        let dir = tempfile::tempdir().unwrap();
        seed_engine_reports(dir.path());
        make_ready(dir.path());

        // No template dir: selection free-styles, one completion for HTML.
        let compositor = compositor(
            dir.path(),
            vec!["```html\n<html><body>final</body></html>\n```".to_string()],
        );
        let task = compositor.start("city flood analysis", None).unwrap();
        let finished = wait_for_terminal(&compositor, &task.task_id).await;

        assert_eq!(finished.status, TaskStatus::Completed);
        assert_eq!(finished.progress, 100);
        assert_eq!(finished.html_content, "<html><body>final</body></html>");
        assert!(finished.report_file_name.starts_with("final_report_city_flood_analysis_"));

        let outputs: Vec<_> = std::fs::read_dir(dir.path().join("final_reports"))
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert!(outputs.iter().any(|n| n.ends_with(".html")));
        assert!(outputs.iter().any(|n| n.starts_with("report_state_") && n.ends_with(".json")));
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_running() {
        let dir = tempfile::tempdir().unwrap();
        seed_engine_reports(dir.path());
        make_ready(dir.path());

        // The worker task has not been polled yet, so the first record is
        // still pending when the second start arrives.
        let compositor = compositor(dir.path(), Vec::new());
        let _task = compositor.start("first", None).unwrap();
        let err = compositor.start("second", None).unwrap_err();
        assert!(matches!(err, ReportError::AlreadyRunning));
    }

    #[tokio::test]
    async fn named_template_is_used_when_llm_selects_it() {
        let dir = tempfile::tempdir().unwrap();
        seed_engine_reports(dir.path());
        make_ready(dir.path());
        let template_dir = dir.path().join("report_templates");
        std::fs::create_dir_all(&template_dir).unwrap();
        std::fs::write(
            template_dir.join("crisis_timeline.md"),
            "# Crisis timeline template\nsections",
        )
        .unwrap();

        let compositor = compositor(
            dir.path(),
            vec![
                r#"{"template_name": "crisis_timeline", "selection_reason": "time-driven event"}"#
                    .to_string(),
                "<html>ok</html>".to_string(),
            ],
        );
        let task = compositor.start("flood", None).unwrap();
        let finished = wait_for_terminal(&compositor, &task.task_id).await;
        assert_eq!(finished.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_discards_worker_output() {
        let dir = tempfile::tempdir().unwrap();
        seed_engine_reports(dir.path());
        make_ready(dir.path());

        let compositor = compositor(dir.path(), Vec::new());
        let task = compositor.start("flood", None).unwrap();
        compositor.cancel(&task.task_id).unwrap();

        // Record is gone; the worker's late updates hit nothing.
        assert!(compositor.progress(&task.task_id).is_none());
        assert!(matches!(
            compositor.cancel(&task.task_id),
            Err(ReportError::UnknownTask(_))
        ));
    }

    #[test]
    fn excerpts_are_truncated_with_marker() {
        let long = "x".repeat(2000);
        let cut = excerpt(&long, 100);
        assert!(cut.ends_with("...(content truncated)"));
        assert_eq!(excerpt("short", 100), "short");
    }
}
