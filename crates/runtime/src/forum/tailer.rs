//! Log tailer and parser
//!
//! One logical tail per engine log. Each poll reads newly appended lines,
//! filters them by level and node origin, reassembles multi-line JSON
//! emissions from the summary nodes, and publishes the extracted content to
//! the forum transcript. A session gate keeps the tailer in a waiting state
//! until the first engine starts summarizing; the gate truncates the forum
//! log so every session starts from a clean transcript.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::Local;
use regex::Regex;

use super::host::ForumHost;
use super::log::ForumLog;
use crate::llm::repair;
use crate::types::{EngineKind, ForumError};

/// Lines matching any of these are summary-node output candidates. The full
/// module paths and the bare `nodes.summary_node` form both appear depending
/// on how the worker's logger was configured.
const TARGET_NODE_PATTERNS: &[&str] = &[
    "FirstSummaryNode",
    "ReflectionSummaryNode",
    "InsightEngine.nodes.summary_node",
    "MediaEngine.nodes.summary_node",
    "QueryEngine.nodes.summary_node",
    "nodes.summary_node",
    "Generating first paragraph summary",
    "Generating reflection summary",
];

/// A session opens when any engine emits its first-summary marker. Content
/// from other engines produced before this marker is intentionally ignored.
const SESSION_START_MARKERS: &[&str] =
    &["FirstSummaryNode", "Generating first paragraph summary"];

/// Error tracebacks contain JSON-like fragments; lines carrying these
/// keywords are never treated as capture targets.
const ERROR_KEYWORDS: &[&str] = &[
    "JSON parsing failed",
    "JSON repair failed",
    "Traceback",
    "File \"",
];

/// Short status chatter that is never worth publishing.
const EXCLUDED_CONTENT_PATTERNS: &[&str] = &[
    "JSON parsing failed",
    "JSON repair failed",
    "Using cleaned text directly",
    "JSON parsing successful",
    "Successfully generated",
    "Updated paragraph",
    "Generating",
    "Started processing",
    "Processing complete",
    "Read HOST speech",
    "Failed to read HOST speech",
    "HOST speech not found",
    "Debug output",
    "Information record",
];

const MIN_VALUABLE_CHARS: usize = 30;

static LEVEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\|\s*(INFO|ERROR|WARNING|DEBUG|TRACE|CRITICAL)\s*\|").expect("valid regex")
});
static STAMP_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[\d{2}:\d{2}:\d{2}\]\s*").expect("valid regex"));
static WIRE_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2}\.\d{3}\s*\|\s*[A-Z]+\s*\|\s*[^|]+?\s*-\s*")
        .expect("valid regex")
});
static BRACKET_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[[^\]]*\]\s*").expect("valid regex"));
static ENGINE_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[(INSIGHT|MEDIA|QUERY)\]\s*").expect("valid regex"));
static LEADING_ENGINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(INSIGHT|MEDIA|QUERY)\s+").expect("valid regex"));
static HSPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").expect("valid regex"));

/// Per-engine tail position and multi-line capture state.
#[derive(Debug, Default)]
pub struct TailerState {
    pub offset: u64,
    pub line_count: u64,
    pub capturing_json: bool,
    pub json_buffer: Vec<String>,
    pub in_error_block: bool,
}

impl TailerState {
    fn reset_capture(&mut self) {
        self.capturing_json = false;
        self.json_buffer.clear();
        self.in_error_block = false;
    }
}

#[derive(Debug, Clone)]
pub struct TailerConfig {
    pub log_dir: PathBuf,
    pub poll_interval: Duration,
    /// Agent utterances per moderator synthesis.
    pub host_threshold: usize,
    /// Consecutive polls with no growth and no capture before a session ends.
    pub inactive_poll_limit: u32,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            poll_interval: Duration::from_secs(1),
            host_threshold: 5,
            inactive_poll_limit: 7200,
        }
    }
}

/// Tails the three engine logs and feeds the forum.
pub struct LogTailer {
    config: TailerConfig,
    forum: Arc<ForumLog>,
    host: Option<Arc<ForumHost>>,
    states: HashMap<EngineKind, TailerState>,
    searching: bool,
    inactive_polls: u32,
    speech_buffer: Vec<String>,
}

impl LogTailer {
    pub fn new(config: TailerConfig, forum: Arc<ForumLog>, host: Option<Arc<ForumHost>>) -> Self {
        Self {
            config,
            forum,
            host,
            states: HashMap::new(),
            searching: false,
            inactive_polls: 0,
            speech_buffer: Vec::new(),
        }
    }

    fn engine_log_path(&self, engine: EngineKind) -> PathBuf {
        self.config.log_dir.join(format!("{}.log", engine.id()))
    }

    /// Record current file sizes as the starting positions so pre-existing
    /// content is never replayed.
    pub fn init_positions(&mut self) {
        for engine in EngineKind::ALL {
            let size = std::fs::metadata(self.engine_log_path(engine))
                .map(|m| m.len())
                .unwrap_or(0);
            let state = self.states.entry(engine).or_default();
            state.offset = size;
            state.reset_capture();
        }
    }

    /// Read newly appended lines. Returns `(lines, grew, shrank)`; on
    /// truncation the offset resets to zero and capture state clears, so the
    /// next poll re-reads from the start of the rotated file.
    fn read_new_lines(&mut self, engine: EngineKind) -> (Vec<String>, bool, bool) {
        let path = self.engine_log_path(engine);
        let state = self.states.entry(engine).or_default();

        let size = match std::fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(_) => return (Vec::new(), false, false),
        };

        if size < state.offset {
            state.offset = 0;
            state.reset_capture();
            return (Vec::new(), false, true);
        }
        if size == state.offset {
            return (Vec::new(), false, false);
        }

        let mut file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!("Failed to open {} log: {e}", engine);
                return (Vec::new(), false, false);
            }
        };
        if file.seek(SeekFrom::Start(state.offset)).is_err() {
            return (Vec::new(), false, false);
        }
        let mut buf = String::new();
        if file.read_to_string(&mut buf).is_err() {
            return (Vec::new(), false, false);
        }
        state.offset = size;

        let lines: Vec<String> = buf
            .split('\n')
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        state.line_count += lines.len() as u64;
        (lines, true, false)
    }

    /// One polling cycle over all three logs.
    pub async fn poll_once(&mut self) -> Result<(), ForumError> {
        let mut any_growth = false;
        let mut any_shrink = false;
        let mut captured_any = false;

        for engine in EngineKind::ALL {
            let (lines, grew, shrank) = self.read_new_lines(engine);
            if shrank {
                any_shrink = true;
                continue;
            }
            if !grew {
                continue;
            }
            any_growth = true;

            if !self.searching {
                let opens_session = lines.iter().any(|line| {
                    is_target_line(line)
                        && SESSION_START_MARKERS.iter().any(|m| line.contains(m))
                });
                if opens_session {
                    tracing::info!("Detected first forum content in {}", engine);
                    self.searching = true;
                    self.inactive_polls = 0;
                    self.forum.start_session()?;
                }
            }

            if self.searching {
                let captured = self.process_lines(engine, &lines);
                for content in captured {
                    self.forum.append(engine.source_tag(), &content)?;
                    captured_any = true;

                    let timestamp = Local::now().format("%H:%M:%S");
                    self.speech_buffer.push(format!(
                        "[{timestamp}] [{}] {content}",
                        engine.source_tag()
                    ));
                    self.maybe_moderate().await?;
                }
            }
        }

        if self.searching {
            if any_shrink {
                self.close_session()?;
            } else if !any_growth && !captured_any {
                self.inactive_polls += 1;
                if self.inactive_polls >= self.config.inactive_poll_limit {
                    tracing::info!("Long inactivity, ending forum session");
                    self.close_session()?;
                }
            } else {
                self.inactive_polls = 0;
            }
        }

        Ok(())
    }

    fn close_session(&mut self) -> Result<(), ForumError> {
        self.searching = false;
        self.inactive_polls = 0;
        self.speech_buffer.clear();
        self.forum.end_session()
    }

    /// Feed the moderator once enough utterances are buffered and no
    /// synthesis is in flight. A failed synthesis keeps the batch buffered.
    async fn maybe_moderate(&mut self) -> Result<(), ForumError> {
        let Some(host) = self.host.clone() else {
            return Ok(());
        };
        let threshold = self.config.host_threshold;
        if self.speech_buffer.len() < threshold || !host.try_begin() {
            return Ok(());
        }

        let batch: Vec<String> = self.speech_buffer[..threshold].to_vec();
        let mut outcome = Ok(());
        match host.generate_speech(&batch).await {
            Some(speech) => match self.forum.append("HOST", &speech) {
                Ok(()) => {
                    self.speech_buffer.drain(..threshold);
                }
                Err(e) => outcome = Err(e),
            },
            None => tracing::warn!("Host speech generation failed"),
        }
        host.end();
        outcome
    }

    /// Extract publishable content from a batch of new lines, maintaining the
    /// ERROR-block and multi-line JSON capture state machines.
    fn process_lines(&mut self, engine: EngineKind, lines: &[String]) -> Vec<String> {
        let mut captured = Vec::new();
        let state = self.states.entry(engine).or_default();

        for line in lines {
            if line.trim().is_empty() {
                continue;
            }

            match level_of(line) {
                Some("ERROR") => {
                    state.in_error_block = true;
                    if state.capturing_json {
                        state.capturing_json = false;
                        state.json_buffer.clear();
                    }
                    continue;
                }
                Some("INFO") => state.in_error_block = false,
                _ => {}
            }

            if state.in_error_block {
                if state.capturing_json {
                    state.capturing_json = false;
                    state.json_buffer.clear();
                }
                continue;
            }

            let is_target = is_target_line(line);

            if is_target && line.contains("Cleaned output: {") {
                state.capturing_json = true;
                state.json_buffer = vec![line.clone()];

                if line.trim_end().ends_with('}') {
                    if let Some(content) = extract_json_content(&state.json_buffer) {
                        captured.push(clean_content_tags(&content));
                    }
                    state.capturing_json = false;
                    state.json_buffer.clear();
                }
            } else if state.capturing_json {
                state.json_buffer.push(line.clone());

                let cleaned = strip_line_prefix(line);
                if cleaned == "}" || cleaned == "] }" {
                    if let Some(content) = extract_json_content(&state.json_buffer) {
                        captured.push(clean_content_tags(&content));
                    }
                    state.capturing_json = false;
                    state.json_buffer.clear();
                }
            } else if is_target && is_valuable_content(line) {
                captured.push(clean_content_tags(&extract_node_content(line)));
            }
        }

        captured
    }

    /// Spawn the polling loop as an owned task.
    pub fn spawn(mut self) -> TailerHandle {
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
        let forum = self.forum.clone();

        let task = tokio::spawn(async move {
            self.init_positions();
            tracing::info!("Forum monitoring started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {
                        if let Err(e) = self.poll_once().await {
                            tracing::warn!("Error during forum recording: {e}");
                            tokio::time::sleep(Duration::from_secs(2)).await;
                        }
                    }
                }
            }
            tracing::info!("Forum monitoring stopped");
        });

        TailerHandle {
            shutdown: shutdown_tx,
            task,
            forum,
        }
    }
}

/// Handle to a running tailer task.
pub struct TailerHandle {
    shutdown: tokio::sync::watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
    forum: Arc<ForumLog>,
}

impl TailerHandle {
    /// Signal shutdown, wait for the loop to drain, and write the session
    /// end marker.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
        if let Err(e) = self.forum.end_session() {
            tracing::warn!("Failed to write forum end marker: {e}");
        }
    }
}

fn level_of(line: &str) -> Option<&str> {
    LEVEL_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Strip the supervisor stamp and the wire-format prefix from a line.
fn strip_line_prefix(line: &str) -> String {
    let stripped = STAMP_PREFIX_RE.replace(line.trim(), "");
    WIRE_PREFIX_RE.replace(&stripped, "").trim().to_string()
}

fn is_target_line(line: &str) -> bool {
    if level_of(line) == Some("ERROR") || line.contains("| ERROR") {
        return false;
    }
    if ERROR_KEYWORDS.iter().any(|k| line.contains(k)) {
        return false;
    }
    TARGET_NODE_PATTERNS.iter().any(|p| line.contains(p))
}

fn is_valuable_content(line: &str) -> bool {
    if line.contains("Cleaned output") {
        return true;
    }
    if EXCLUDED_CONTENT_PATTERNS.iter().any(|p| line.contains(p)) {
        return false;
    }
    strip_line_prefix(line).chars().count() >= MIN_VALUABLE_CHARS
}

/// Reassemble and parse the buffered `Cleaned output:` emission.
///
/// Continuation lines have their prefixes stripped and are concatenated
/// without separators, so JSON string escapes survive intact. Unparseable
/// buffers are dropped silently.
fn extract_json_content(lines: &[String]) -> Option<String> {
    let start_idx = lines.iter().position(|l| l.contains("Cleaned output: {"))?;
    let first = &lines[start_idx];
    let json_start = first.find("Cleaned output: ")?;
    let json_part = &first[json_start + "Cleaned output: ".len()..];

    if lines.len() == start_idx + 1 {
        let trimmed = json_part.trim();
        if !trimmed.ends_with('}') || trimmed.matches('{').count() != trimmed.matches('}').count() {
            return None;
        }
        return repair::repair_json(trimmed).map(|v| format_json_content(&v));
    }

    let mut json_text = json_part.to_string();
    for line in &lines[start_idx + 1..] {
        json_text.push_str(&strip_line_prefix(line));
    }
    repair::repair_json(json_text.trim()).map(|v| format_json_content(&v))
}

/// Prefer the reflection field, then the first-summary field, then a
/// pretty-printed rendering of the whole object.
fn format_json_content(value: &serde_json::Value) -> String {
    for key in ["updated_paragraph_latest_state", "paragraph_latest_state"] {
        if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
            if !text.is_empty() {
                return text.to_string();
            }
        }
    }
    format!(
        "Cleaned output: {}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    )
}

/// Extract the body of a plain (non-JSON) target line.
fn extract_node_content(line: &str) -> String {
    let mut content = strip_line_prefix(line);
    loop {
        let next = BRACKET_TAG_RE.replace(&content, "").to_string();
        if next == content {
            break;
        }
        content = next;
    }
    for prefix in ["First summary: ", "Reflection summary: ", "Cleaned output: "] {
        if let Some(rest) = content.strip_prefix(prefix) {
            content = rest.to_string();
            break;
        }
    }
    content = LEADING_ENGINE_RE.replace(&content, "").to_string();
    HSPACE_RE.replace_all(&content, " ").trim().to_string()
}

/// Strip engine tags and leading bracket tags; collapse horizontal
/// whitespace runs while preserving newlines (they are escaped at
/// publication).
fn clean_content_tags(content: &str) -> String {
    let mut out = ENGINE_TAG_RE.replace_all(content, "").to_string();
    out = LEADING_ENGINE_RE.replace(&out, "").to_string();
    out = BRACKET_TAG_RE.replace(&out, "").to_string();
    HSPACE_RE.replace_all(&out, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Completion;
    use crate::types::{LlmError, LlmRole};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingLlm {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Completion for CountingLlm {
        async fn complete(
            &self,
            _role: LlmRole,
            _system: &str,
            _user: &str,
        ) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("moderator guidance".to_string())
        }
    }

    struct FailingLlm {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Completion for FailingLlm {
        async fn complete(
            &self,
            _role: LlmRole,
            _system: &str,
            _user: &str,
        ) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::Api {
                status: 503,
                message: "overloaded".to_string(),
            })
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        tailer: LogTailer,
        forum: Arc<ForumLog>,
        llm: Arc<CountingLlm>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = TailerConfig {
            log_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let forum = Arc::new(ForumLog::new(dir.path()));
        let llm = Arc::new(CountingLlm {
            calls: AtomicU32::new(0),
        });
        let host = Arc::new(ForumHost::new(llm.clone()));
        let mut tailer = LogTailer::new(config, forum.clone(), Some(host));
        tailer.init_positions();
        Fixture {
            dir,
            tailer,
            forum,
            llm,
        }
    }

    fn append_lines(fixture: &Fixture, engine: EngineKind, lines: &[&str]) {
        use std::io::Write;
        let path = fixture.dir.path().join(format!("{}.log", engine.id()));
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
    }

    fn wire(level: &str, logger: &str, body: &str) -> String {
        format!("2025-08-01 12:00:00.000 | {level:<8} | {logger}:run:125 - {body}")
    }

    fn session_marker() -> String {
        wire(
            "INFO",
            "query.nodes.summary_node",
            "Generating first paragraph summary",
        )
    }

    #[tokio::test]
    async fn error_then_info_filter_captures_only_clean_output() {
        let mut f = fixture();
        append_lines(
            &f,
            EngineKind::Query,
            &[
                &session_marker(),
                &wire(
                    "ERROR",
                    "e.nodes.summary_node",
                    "JSON parsing failed: expected value",
                ),
                &wire(
                    "INFO",
                    "e.nodes.summary_node",
                    r#"Cleaned output: {"paragraph_latest_state": "ok"}"#,
                ),
            ],
        );
        f.tailer.poll_once().await.unwrap();

        let messages = f.forum.agent_messages().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "ok");
        assert_eq!(messages[0].source, "QUERY");
    }

    #[tokio::test]
    async fn error_block_suppresses_json_until_next_info() {
        let mut f = fixture();
        append_lines(
            &f,
            EngineKind::Insight,
            &[
                &session_marker(),
                &wire("ERROR", "insight.nodes.summary_node", "Traceback follows"),
                // WARNING keeps the error block open; this JSON must be dropped
                &wire(
                    "WARNING",
                    "insight.nodes.summary_node",
                    r#"Cleaned output: {"paragraph_latest_state": "poisoned"}"#,
                ),
                &wire("INFO", "insight.nodes.summary_node", "recovered"),
                &wire(
                    "INFO",
                    "insight.nodes.summary_node",
                    r#"Cleaned output: {"paragraph_latest_state": "clean"}"#,
                ),
            ],
        );
        f.tailer.poll_once().await.unwrap();

        let messages = f.forum.agent_messages().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "clean");
    }

    #[tokio::test]
    async fn multi_line_json_is_reassembled_with_escaped_newlines() {
        let mut f = fixture();
        append_lines(
            &f,
            EngineKind::Insight,
            &[
                &session_marker(),
                &wire("INFO", "insight.nodes.summary_node", "Cleaned output: {"),
                &wire(
                    "INFO",
                    "insight.nodes.summary_node",
                    r#""updated_paragraph_latest_state": "alpha\nbeta""#,
                ),
                &wire("INFO", "insight.nodes.summary_node", "}"),
            ],
        );
        f.tailer.poll_once().await.unwrap();

        let messages = f.forum.agent_messages().unwrap();
        assert_eq!(messages.len(), 1);
        // The value's real newline is escaped back to the two-character
        // sequence in the forum line.
        assert_eq!(messages[0].content, "alpha\\nbeta");
    }

    #[tokio::test]
    async fn truncation_resets_offset_and_buffer() {
        let mut f = fixture();
        append_lines(
            &f,
            EngineKind::Media,
            &[
                &session_marker(),
                &wire("INFO", "media.nodes.summary_node", "Cleaned output: {"),
            ],
        );
        f.tailer.poll_once().await.unwrap();
        {
            let state = f.tailer.states.get(&EngineKind::Media).unwrap();
            assert!(state.capturing_json);
            assert!(state.offset > 0);
        }

        // Truncate the log: shrink must reset the offset and clear the
        // in-flight buffer, and the session must close.
        let path = f.dir.path().join("media.log");
        std::fs::write(&path, "short\n").unwrap();
        f.tailer.poll_once().await.unwrap();

        let state = f.tailer.states.get(&EngineKind::Media).unwrap();
        assert_eq!(state.offset, 0);
        assert!(!state.capturing_json);
        assert!(state.json_buffer.is_empty());
        assert!(!f.tailer.searching);

        // A fresh session marker in the rewritten file must be accepted and
        // reinitialize the forum log.
        std::fs::write(
            &path,
            format!(
                "{}\n{}\n",
                session_marker(),
                wire(
                    "INFO",
                    "media.nodes.summary_node",
                    r#"Cleaned output: {"paragraph_latest_state": "fresh session"}"#
                )
            ),
        )
        .unwrap();
        f.tailer.poll_once().await.unwrap();

        assert!(f.tailer.searching);
        let messages = f.forum.agent_messages().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "fresh session");
    }

    #[tokio::test]
    async fn moderator_fires_once_per_five_utterances() {
        let mut f = fixture();
        let mut lines = vec![session_marker()];
        for i in 0..12 {
            lines.push(wire(
                "INFO",
                "query.nodes.summary_node",
                &format!(r#"Cleaned output: {{"paragraph_latest_state": "update {i}"}}"#),
            ));
        }
        let refs: Vec<&str> = lines.iter().map(|s| s.as_str()).collect();
        append_lines(&f, EngineKind::Query, &refs);

        f.tailer.poll_once().await.unwrap();

        // 12 utterances: two syntheses consumed 10, two stay buffered.
        assert_eq!(f.llm.calls.load(Ordering::SeqCst), 2);
        assert_eq!(f.tailer.speech_buffer.len(), 2);

        let host_lines: Vec<_> = f
            .forum
            .read_lines()
            .unwrap()
            .into_iter()
            .filter(|l| l.contains("[HOST]"))
            .collect();
        assert_eq!(host_lines.len(), 2);
    }

    #[tokio::test]
    async fn failed_synthesis_keeps_the_batch_buffered() {
        let dir = tempfile::tempdir().unwrap();
        let config = TailerConfig {
            log_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let forum = Arc::new(ForumLog::new(dir.path()));
        let llm = Arc::new(FailingLlm {
            calls: AtomicU32::new(0),
        });
        let host = Arc::new(ForumHost::new(llm.clone()));
        let mut tailer = LogTailer::new(config, forum.clone(), Some(host.clone()));
        tailer.init_positions();

        let mut lines = vec![session_marker()];
        for i in 0..5 {
            lines.push(wire(
                "INFO",
                "query.nodes.summary_node",
                &format!(r#"Cleaned output: {{"paragraph_latest_state": "update {i}"}}"#),
            ));
        }
        let refs: Vec<&str> = lines.iter().map(|s| s.as_str()).collect();
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.path().join("query.log"))
            .unwrap();
        for line in &refs {
            writeln!(file, "{line}").unwrap();
        }

        tailer.poll_once().await.unwrap();

        // The synthesis was attempted once and failed: nothing consumed,
        // nothing appended under HOST, and the slot is released for the
        // next trigger.
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        assert_eq!(tailer.speech_buffer.len(), 5);
        assert!(!host.is_generating());
        let host_lines: Vec<_> = forum
            .read_lines()
            .unwrap()
            .into_iter()
            .filter(|l| l.contains("[HOST]"))
            .collect();
        assert!(host_lines.is_empty());
    }

    #[tokio::test]
    async fn waiting_state_ignores_content_until_first_summary_marker() {
        let mut f = fixture();
        append_lines(
            &f,
            EngineKind::Insight,
            &[&wire(
                "INFO",
                "insight.nodes.summary_node",
                r#"Cleaned output: {"paragraph_latest_state": "too early"}"#,
            )],
        );
        f.tailer.poll_once().await.unwrap();
        assert!(!f.tailer.searching);
        assert!(f.forum.agent_messages().unwrap().is_empty());

        append_lines(&f, EngineKind::Insight, &[&session_marker()]);
        f.tailer.poll_once().await.unwrap();
        assert!(f.tailer.searching);
    }

    #[tokio::test]
    async fn bracketed_tags_are_stripped_from_published_content() {
        let mut f = fixture();
        append_lines(
            &f,
            EngineKind::Query,
            &[
                &session_marker(),
                &wire(
                    "INFO",
                    "query.nodes.summary_node",
                    r#"Cleaned output: {"paragraph_latest_state": "[QUERY] coverage   expanded rapidly"}"#,
                ),
            ],
        );
        f.tailer.poll_once().await.unwrap();

        let messages = f.forum.agent_messages().unwrap();
        assert_eq!(messages[0].content, "coverage expanded rapidly");
    }

    #[test]
    fn prefix_stripping_handles_both_stamp_forms() {
        let stamped = "[12:00:01] 2025-08-01 12:00:00.000 | INFO     | a.b:run:10 - }";
        assert_eq!(strip_line_prefix(stamped), "}");
        let bare = "2025-08-01 12:00:00.000 | INFO | a.b:run:10 - ] }";
        assert_eq!(strip_line_prefix(bare), "] }");
    }

    #[test]
    fn level_detection_matches_padded_levels() {
        assert_eq!(level_of(&wire("ERROR", "x", "boom")), Some("ERROR"));
        assert_eq!(level_of(&wire("INFO", "x", "fine")), Some("INFO"));
        assert_eq!(level_of("no level here"), None);
    }
}
