//! Mutable per-run research state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::SearchResult;

/// Run status of a research report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Planning,
    Researching,
    Completed,
    Failed,
}

/// One executed search: the query and whatever it returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRecord {
    pub query: String,
    pub results: Vec<SearchResult>,
}

/// Research progress for a single paragraph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Research {
    pub latest_summary: String,
    pub reflection_count: u32,
    /// Append-only; never rewritten once recorded.
    pub search_history: Vec<SearchRecord>,
}

impl Research {
    pub fn add_search_results(&mut self, query: &str, results: Vec<SearchResult>) {
        self.search_history.push(SearchRecord {
            query: query.to_string(),
            results,
        });
    }
}

/// A planned report paragraph and its research state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paragraph {
    pub title: String,
    /// Planner output: what this paragraph is expected to cover.
    pub expected_content: String,
    pub research: Research,
    pub is_completed: bool,
}

impl Paragraph {
    pub fn new(title: impl Into<String>, expected_content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            expected_content: expected_content.into(),
            research: Research::default(),
            is_completed: false,
        }
    }
}

/// Mutable container for one research run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportState {
    pub query: String,
    pub report_title: String,
    pub paragraphs: Vec<Paragraph>,
    pub status: ReportStatus,
    pub final_report: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ReportState {
    pub fn new(query: impl Into<String>) -> Self {
        let query = query.into();
        let now = Utc::now();
        Self {
            report_title: query.clone(),
            query,
            paragraphs: Vec::new(),
            status: ReportStatus::Pending,
            final_report: String::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Install the planned structure, capping paragraph count.
    pub fn set_structure(&mut self, paragraphs: Vec<Paragraph>, max_paragraphs: usize) {
        self.paragraphs = paragraphs.into_iter().take(max_paragraphs).collect();
        self.status = ReportStatus::Researching;
        self.touch();
    }

    pub fn mark_completed(&mut self) {
        self.status = ReportStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.touch();
    }

    pub fn mark_failed(&mut self) {
        self.status = ReportStatus::Failed;
        self.touch();
    }

    pub fn completed_paragraphs(&self) -> usize {
        self.paragraphs.iter().filter(|p| p.is_completed).count()
    }

    pub fn save_to_file(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }

    pub fn load_from_file(path: &Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
