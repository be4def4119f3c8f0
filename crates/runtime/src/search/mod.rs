//! Search tool dispatch and the search backend capability
//!
//! Tool dispatch is a tagged sum type: parameters that only apply to some
//! tools (date ranges, platform, sentiment texts) live inside those variants.
//! Node output is parsed into a [`SearchDirective`] first and then resolved
//! against the engine's tool set, falling back to the engine's generic tool
//! when a required parameter is missing or malformed.

pub mod client;

pub use client::HttpSearchClient;

use async_trait::async_trait;
use serde::Deserialize;

use crate::types::{EngineKind, SearchError, SearchResult};

/// A fully-validated search tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchTool {
    // Query engine
    BasicNews,
    DeepNews,
    NewsLast24Hours,
    NewsLastWeek,
    NewsImages,
    NewsByDate { start: String, end: String },
    // Media engine
    Comprehensive,
    WebOnly,
    StructuredData,
    Last24Hours,
    LastWeek,
    // Insight engine
    HotContent { time_period: Option<String> },
    GlobalTopic,
    TopicByDate { start: String, end: String },
    TopicOnPlatform {
        platform: String,
        start: Option<String>,
        end: Option<String>,
    },
    CommentsForTopic,
    AnalyzeSentiment { texts: Vec<String> },
}

impl SearchTool {
    /// Wire name of the tool, as emitted by the search nodes.
    pub fn name(&self) -> &'static str {
        match self {
            SearchTool::BasicNews => "basic_search_news",
            SearchTool::DeepNews => "deep_search_news",
            SearchTool::NewsLast24Hours => "search_news_last_24_hours",
            SearchTool::NewsLastWeek => "search_news_last_week",
            SearchTool::NewsImages => "search_images_for_news",
            SearchTool::NewsByDate { .. } => "search_news_by_date",
            SearchTool::Comprehensive => "comprehensive_search",
            SearchTool::WebOnly => "web_search_only",
            SearchTool::StructuredData => "search_for_structured_data",
            SearchTool::Last24Hours => "search_last_24_hours",
            SearchTool::LastWeek => "search_last_week",
            SearchTool::HotContent { .. } => "search_hot_content",
            SearchTool::GlobalTopic => "search_topic_globally",
            SearchTool::TopicByDate { .. } => "search_topic_by_date",
            SearchTool::TopicOnPlatform { .. } => "search_topic_on_platform",
            SearchTool::CommentsForTopic => "get_comments_for_topic",
            SearchTool::AnalyzeSentiment { .. } => "analyze_sentiment",
        }
    }

    /// The engine's fallback tool when a directive cannot be honored.
    pub fn generic_for(engine: EngineKind) -> SearchTool {
        match engine {
            EngineKind::Query => SearchTool::BasicNews,
            EngineKind::Media => SearchTool::Comprehensive,
            EngineKind::Insight => SearchTool::GlobalTopic,
        }
    }
}

/// Raw tool selection as produced by a search or reflection node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchDirective {
    #[serde(default)]
    pub search_query: String,
    #[serde(default)]
    pub search_tool: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub time_period: Option<String>,
    #[serde(default)]
    pub texts: Option<Vec<String>>,
}

/// Validate `YYYY-MM-DD` format and calendar validity.
pub fn is_valid_date(date: &str) -> bool {
    if date.len() != 10 {
        return false;
    }
    let bytes = date.as_bytes();
    if bytes[4] != b'-' || bytes[7] != b'-' {
        return false;
    }
    if !date
        .chars()
        .enumerate()
        .all(|(i, c)| i == 4 || i == 7 || c.is_ascii_digit())
    {
        return false;
    }
    chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok()
}

/// Resolve a directive into a concrete tool for the engine.
///
/// A missing or invalid required parameter, or an unknown tool name, falls
/// back to the engine's generic tool; the returned reason (if any) is logged
/// by the caller as a warning.
pub fn resolve_tool(
    engine: EngineKind,
    directive: &SearchDirective,
) -> (SearchTool, Option<String>) {
    let name = directive.search_tool.trim();
    let fallback = |reason: String| (SearchTool::generic_for(engine), Some(reason));

    let date_range = || -> Result<(String, String), String> {
        match (&directive.start_date, &directive.end_date) {
            (Some(start), Some(end)) if is_valid_date(start) && is_valid_date(end) => {
                Ok((start.clone(), end.clone()))
            }
            (Some(start), Some(end)) => Err(format!(
                "date format error (expected YYYY-MM-DD): start_date={start}, end_date={end}"
            )),
            _ => Err("missing start_date / end_date".to_string()),
        }
    };

    match (engine, name) {
        (EngineKind::Query, "basic_search_news") => (SearchTool::BasicNews, None),
        (EngineKind::Query, "deep_search_news") => (SearchTool::DeepNews, None),
        (EngineKind::Query, "search_news_last_24_hours") => (SearchTool::NewsLast24Hours, None),
        (EngineKind::Query, "search_news_last_week") => (SearchTool::NewsLastWeek, None),
        (EngineKind::Query, "search_images_for_news") => (SearchTool::NewsImages, None),
        (EngineKind::Query, "search_news_by_date") => match date_range() {
            Ok((start, end)) => (SearchTool::NewsByDate { start, end }, None),
            Err(reason) => fallback(reason),
        },

        (EngineKind::Media, "comprehensive_search") => (SearchTool::Comprehensive, None),
        (EngineKind::Media, "web_search_only") => (SearchTool::WebOnly, None),
        (EngineKind::Media, "search_for_structured_data") => (SearchTool::StructuredData, None),
        (EngineKind::Media, "search_last_24_hours") => (SearchTool::Last24Hours, None),
        (EngineKind::Media, "search_last_week") => (SearchTool::LastWeek, None),

        (EngineKind::Insight, "search_hot_content") => (
            SearchTool::HotContent {
                time_period: directive.time_period.clone(),
            },
            None,
        ),
        (EngineKind::Insight, "search_topic_globally") => (SearchTool::GlobalTopic, None),
        (EngineKind::Insight, "search_topic_by_date") => match date_range() {
            Ok((start, end)) => (SearchTool::TopicByDate { start, end }, None),
            Err(reason) => fallback(reason),
        },
        (EngineKind::Insight, "search_topic_on_platform") => match &directive.platform {
            Some(platform) if !platform.trim().is_empty() => (
                SearchTool::TopicOnPlatform {
                    platform: platform.clone(),
                    start: directive.start_date.clone().filter(|d| is_valid_date(d)),
                    end: directive.end_date.clone().filter(|d| is_valid_date(d)),
                },
                None,
            ),
            _ => fallback("missing platform".to_string()),
        },
        (EngineKind::Insight, "get_comments_for_topic") => (SearchTool::CommentsForTopic, None),
        (EngineKind::Insight, "analyze_sentiment") => match &directive.texts {
            Some(texts) if !texts.is_empty() => (
                SearchTool::AnalyzeSentiment {
                    texts: texts.clone(),
                },
                None,
            ),
            _ => fallback("missing texts".to_string()),
        },

        (_, other) => fallback(format!("unknown search tool: {other}")),
    }
}

/// Search backend capability: `(tool, query) -> results`.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        tool: &SearchTool,
        query: &str,
    ) -> Result<Vec<SearchResult>, SearchError>;
}
