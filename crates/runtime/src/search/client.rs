//! Tavily-style HTTP search backend

use std::time::Duration;

use async_trait::async_trait;

use super::{SearchProvider, SearchTool};
use crate::types::{SearchError, SearchResult};

const DEFAULT_MAX_RESULTS: u32 = 7;
const DEEP_MAX_RESULTS: u32 = 10;

/// Thin client for a Tavily-compatible search API.
///
/// Tool variants map onto request parameters (topic, recency window, date
/// range, image inclusion); variants the backend has no native support for
/// degrade to a plain search with the query annotated.
pub struct HttpSearchClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl HttpSearchClient {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        Self::with_base_url(api_key, "https://api.tavily.com".to_string(), timeout)
    }

    pub fn with_base_url(api_key: String, base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn request_body(&self, tool: &SearchTool, query: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "api_key": self.api_key,
            "query": query,
            "search_depth": "basic",
            "max_results": DEFAULT_MAX_RESULTS,
        });

        match tool {
            SearchTool::BasicNews | SearchTool::NewsLastWeek => {
                body["topic"] = "news".into();
                if matches!(tool, SearchTool::NewsLastWeek) {
                    body["days"] = 7.into();
                }
            }
            SearchTool::DeepNews => {
                body["topic"] = "news".into();
                body["search_depth"] = "advanced".into();
                body["max_results"] = DEEP_MAX_RESULTS.into();
                body["include_raw_content"] = true.into();
            }
            SearchTool::NewsLast24Hours => {
                body["topic"] = "news".into();
                body["days"] = 1.into();
            }
            SearchTool::NewsImages => {
                body["topic"] = "news".into();
                body["include_images"] = true.into();
            }
            SearchTool::NewsByDate { start, end } => {
                body["topic"] = "news".into();
                body["start_date"] = start.as_str().into();
                body["end_date"] = end.as_str().into();
            }
            SearchTool::Comprehensive => {
                body["search_depth"] = "advanced".into();
                body["max_results"] = DEEP_MAX_RESULTS.into();
            }
            SearchTool::WebOnly => {}
            SearchTool::StructuredData => {
                body["query"] = format!("{query} statistics data table").into();
            }
            SearchTool::Last24Hours => {
                body["days"] = 1.into();
            }
            SearchTool::LastWeek => {
                body["days"] = 7.into();
            }
            // Database-backed tools degrade to plain web search when routed
            // through the HTTP backend.
            SearchTool::HotContent { .. }
            | SearchTool::GlobalTopic
            | SearchTool::TopicByDate { .. }
            | SearchTool::TopicOnPlatform { .. }
            | SearchTool::CommentsForTopic
            | SearchTool::AnalyzeSentiment { .. } => {
                if let SearchTool::TopicByDate { start, end } = tool {
                    body["start_date"] = start.as_str().into();
                    body["end_date"] = end.as_str().into();
                }
            }
        }

        body
    }

    fn parse_results(payload: &serde_json::Value) -> Vec<SearchResult> {
        payload
            .get("results")
            .and_then(|r| r.as_array())
            .map(|items| {
                items
                    .iter()
                    .map(|item| SearchResult {
                        title: item
                            .get("title")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        url: item
                            .get("url")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        content: item
                            .get("content")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        score: item.get("score").and_then(|v| v.as_f64()),
                        raw_content: item
                            .get("raw_content")
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string()),
                        published_date: item
                            .get("published_date")
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string()),
                        ..Default::default()
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl SearchProvider for HttpSearchClient {
    async fn search(
        &self,
        tool: &SearchTool,
        query: &str,
    ) -> Result<Vec<SearchResult>, SearchError> {
        if self.api_key.is_empty() {
            return Err(SearchError::MissingApiKey);
        }

        let body = self.request_body(tool, query);
        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(SearchError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        Ok(Self::parse_results(&payload))
    }
}
