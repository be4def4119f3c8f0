//! The shared forum transcript
//!
//! A single append-only file; every physical line is
//! `[HH:MM:SS] [SOURCE] body` with newlines in the body escaped to the
//! two-character sequence `\n`. All writes go through one process-wide lock
//! so no line is ever partially interleaved.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::Local;
use parking_lot::Mutex;
use regex::Regex;

use crate::types::ForumError;

static LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(\d{2}:\d{2}:\d{2})\]\s*\[([A-Z]+)\]\s*(.*)$").expect("valid regex")
});

/// One parsed forum transcript line.
#[derive(Debug, Clone, PartialEq)]
pub struct ForumMessage {
    pub timestamp: String,
    pub source: String,
    pub content: String,
}

impl ForumMessage {
    /// Restore escaped newlines to real ones.
    pub fn unescaped_content(&self) -> String {
        self.content.replace("\\n", "\n").replace("\\r", "\r")
    }
}

/// Append-only forum log with a process-wide write lock.
pub struct ForumLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ForumLog {
    pub fn new(log_dir: &Path) -> Self {
        Self {
            path: log_dir.join("forum.log"),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Append one message under the write lock, escaping newlines so the
    /// record occupies exactly one physical line.
    pub fn append(&self, source: &str, content: &str) -> Result<(), ForumError> {
        let _guard = self.write_lock.lock();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(ForumError::Write)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(ForumError::Write)?;

        let timestamp = Local::now().format("%H:%M:%S");
        let one_line = content.replace('\n', "\\n").replace('\r', "\\r");
        writeln!(file, "[{timestamp}] [{source}] {one_line}").map_err(ForumError::Write)?;
        file.flush().map_err(ForumError::Write)
    }

    /// Truncate the transcript and write the session start marker.
    pub fn start_session(&self) -> Result<(), ForumError> {
        {
            let _guard = self.write_lock.lock();
            if self.path.exists() {
                std::fs::remove_file(&self.path).map_err(ForumError::Write)?;
            }
        }
        let started = Local::now().format("%Y-%m-%d %H:%M:%S");
        self.append(
            "SYSTEM",
            &format!("=== ForumEngine monitoring started - {started} ==="),
        )
    }

    /// Write the session end marker.
    pub fn end_session(&self) -> Result<(), ForumError> {
        let ended = Local::now().format("%Y-%m-%d %H:%M:%S");
        self.append(
            "SYSTEM",
            &format!("=== ForumEngine forum ended - {ended} ==="),
        )
    }

    pub fn read_lines(&self) -> Result<Vec<String>, ForumError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(ForumError::Read)?;
        Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.to_string())
            .collect())
    }

    /// Parse one physical line; `None` for anything off-format.
    pub fn parse_line(line: &str) -> Option<ForumMessage> {
        let caps = LINE_RE.captures(line)?;
        Some(ForumMessage {
            timestamp: caps[1].to_string(),
            source: caps[2].to_string(),
            content: caps[3].to_string(),
        })
    }

    /// Agent messages only (QUERY / MEDIA / INSIGHT), in file order.
    pub fn agent_messages(&self) -> Result<Vec<ForumMessage>, ForumError> {
        Ok(self
            .read_lines()?
            .iter()
            .filter_map(|line| Self::parse_line(line))
            .filter(|m| matches!(m.source.as_str(), "QUERY" | "MEDIA" | "INSIGHT"))
            .filter(|m| !m.content.trim().is_empty())
            .collect())
    }
}

/// Most recent moderator speech from `logs/forum.log`, with newlines
/// restored. Summary nodes prepend this to their prompts as guidance.
pub fn latest_host_speech(log_dir: &Path) -> Option<String> {
    let log = ForumLog::new(log_dir);
    let lines = log.read_lines().ok()?;
    lines
        .iter()
        .rev()
        .filter_map(|line| ForumLog::parse_line(line))
        .find(|m| m.source == "HOST")
        .map(|m| m.unescaped_content().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_single_physical_records() {
        let dir = tempfile::tempdir().unwrap();
        let log = ForumLog::new(dir.path());

        log.append("INSIGHT", "line one\nline two").unwrap();
        log.append("HOST", "guidance").unwrap();

        let lines = log.read_lines().unwrap();
        assert_eq!(lines.len(), 2);
        let re = Regex::new(r"^\[\d{2}:\d{2}:\d{2}\] \[[A-Z]+\] [^\n]*$").unwrap();
        for line in &lines {
            assert!(re.is_match(line), "malformed line: {line}");
        }
        assert!(lines[0].contains("line one\\nline two"));
    }

    #[test]
    fn round_trip_preserves_publication_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = ForumLog::new(dir.path());
        log.append("QUERY", "first").unwrap();
        log.append("MEDIA", "second").unwrap();
        log.append("SYSTEM", "marker").unwrap();
        log.append("QUERY", "third").unwrap();

        let messages = log.agent_messages().unwrap();
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn session_markers_bracket_the_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let log = ForumLog::new(dir.path());
        log.append("QUERY", "stale").unwrap();

        log.start_session().unwrap();
        log.append("INSIGHT", "fresh").unwrap();
        log.end_session().unwrap();

        let lines = log.read_lines().unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("=== ForumEngine monitoring started -"));
        assert!(lines[2].contains("=== ForumEngine forum ended -"));
    }

    #[test]
    fn latest_host_speech_unescapes_newlines() {
        let dir = tempfile::tempdir().unwrap();
        let log = ForumLog::new(dir.path());
        log.append("HOST", "older speech").unwrap();
        log.append("QUERY", "agent content").unwrap();
        log.append("HOST", "timeline:\nfirst, second").unwrap();

        let speech = latest_host_speech(dir.path()).unwrap();
        assert_eq!(speech, "timeline:\nfirst, second");
    }

    #[test]
    fn missing_log_yields_no_speech() {
        let dir = tempfile::tempdir().unwrap();
        assert!(latest_host_speech(dir.path()).is_none());
    }
}
