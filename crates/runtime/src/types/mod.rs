//! Core types and data structures shared across the Tidewave runtime

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod error;

pub use error::*;

/// One of the three research engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Query,
    Media,
    Insight,
}

impl EngineKind {
    pub const ALL: [EngineKind; 3] = [EngineKind::Query, EngineKind::Media, EngineKind::Insight];

    /// Lowercase identifier used for log files, directories, and URLs.
    pub fn id(&self) -> &'static str {
        match self {
            EngineKind::Query => "query",
            EngineKind::Media => "media",
            EngineKind::Insight => "insight",
        }
    }

    /// Uppercase tag used as the forum message source.
    pub fn source_tag(&self) -> &'static str {
        match self {
            EngineKind::Query => "QUERY",
            EngineKind::Media => "MEDIA",
            EngineKind::Insight => "INSIGHT",
        }
    }

    /// Directory the engine writes finished markdown reports into.
    pub fn reports_dir(&self) -> String {
        format!("{}_engine_streamlit_reports", self.id())
    }

    /// Loopback port for the engine worker's HTTP surface.
    pub fn api_port(&self) -> u16 {
        match self {
            EngineKind::Insight => 8601,
            EngineKind::Media => 8602,
            EngineKind::Query => 8603,
        }
    }

    pub fn parse(s: &str) -> Option<EngineKind> {
        match s.to_ascii_lowercase().as_str() {
            "query" => Some(EngineKind::Query),
            "media" => Some(EngineKind::Media),
            "insight" => Some(EngineKind::Insight),
            _ => None,
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// LLM role, used to select API key, base URL, and model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LlmRole {
    InsightEngine,
    MediaEngine,
    QueryEngine,
    ReportEngine,
    ForumHost,
    KeywordOptimizer,
    MindSpider,
}

impl LlmRole {
    pub fn for_engine(engine: EngineKind) -> LlmRole {
        match engine {
            EngineKind::Query => LlmRole::QueryEngine,
            EngineKind::Media => LlmRole::MediaEngine,
            EngineKind::Insight => LlmRole::InsightEngine,
        }
    }

    /// Environment variable prefix, e.g. `QUERY_ENGINE` for `QUERY_ENGINE_API_KEY`.
    pub fn env_prefix(&self) -> &'static str {
        match self {
            LlmRole::InsightEngine => "INSIGHT_ENGINE",
            LlmRole::MediaEngine => "MEDIA_ENGINE",
            LlmRole::QueryEngine => "QUERY_ENGINE",
            LlmRole::ReportEngine => "REPORT_ENGINE",
            LlmRole::ForumHost => "FORUM_HOST",
            LlmRole::KeywordOptimizer => "KEYWORD_OPTIMIZER",
            LlmRole::MindSpider => "MINDSPIDER",
        }
    }
}

impl std::fmt::Display for LlmRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.env_prefix())
    }
}

/// Immutable research request handed to an engine worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchQuery {
    pub topic: String,
    pub engine: EngineKind,
}

/// A single search hit returned by a search backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engagement: Option<i64>,
}

/// Unique identifier for report compositor tasks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(format!("report_{}", Uuid::new_v4().simple()))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a supervised engine worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Stopped,
    Starting,
    Running,
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessStatus::Stopped => f.write_str("stopped"),
            ProcessStatus::Starting => f.write_str("starting"),
            ProcessStatus::Running => f.write_str("running"),
        }
    }
}

/// Sanitize a query string for use in artifact filenames.
///
/// Keeps alphanumerics, spaces, hyphens, and underscores, replaces spaces
/// with underscores, and truncates to 30 characters.
pub fn sanitize_query_for_filename(query: &str) -> String {
    let kept: String = query
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-' || *c == '_')
        .collect();
    kept.trim_end()
        .replace(' ', "_")
        .chars()
        .take(30)
        .collect()
}
