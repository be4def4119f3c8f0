//! Streaming chat-completions client with per-role routing

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use super::Completion;
use crate::config::{RoleEndpoint, Settings};
use crate::retry::{retry, RetryConfig};
use crate::types::{LlmError, LlmRole};

/// Gateway configuration knobs.
#[derive(Debug, Clone)]
pub struct LlmGatewayConfig {
    pub temperature: f32,
    /// Outer per-call ceiling for report synthesis.
    pub report_timeout: Duration,
    /// Outer per-call ceiling for everything else (search nodes, summaries).
    pub node_timeout: Duration,
    pub max_tokens: u32,
}

impl Default for LlmGatewayConfig {
    fn default() -> Self {
        Self {
            temperature: 0.6,
            report_timeout: Duration::from_secs(900),
            node_timeout: Duration::from_secs(240),
            max_tokens: 8192,
        }
    }
}

/// OpenAI-compatible streaming completions gateway.
///
/// Endpoint and model are selected per role from [`Settings`]; each call is
/// wrapped in the strict LLM retry profile and an outer timeout.
pub struct LlmGateway {
    client: reqwest::Client,
    settings: Settings,
    config: LlmGatewayConfig,
    retry: RetryConfig,
}

impl LlmGateway {
    pub fn new(settings: Settings) -> Self {
        Self::with_config(settings, LlmGatewayConfig::default())
    }

    pub fn with_config(settings: Settings, config: LlmGatewayConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            client,
            settings,
            config,
            retry: RetryConfig::llm(),
        }
    }

    fn timeout_for(&self, role: LlmRole) -> Duration {
        match role {
            LlmRole::ReportEngine => self.config.report_timeout,
            _ => self.config.node_timeout,
        }
    }

    /// One streamed completion attempt: send the request, then concatenate
    /// `delta.content` fragments from the SSE stream.
    ///
    /// Chunks are buffered as raw bytes and split on newlines (ASCII), so
    /// multi-byte UTF-8 sequences are never cut at a chunk boundary.
    async fn stream_once(
        &self,
        endpoint: &RoleEndpoint,
        system: &str,
        user: &str,
    ) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "model": endpoint.model_name,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "stream": true
        });

        let start = std::time::Instant::now();

        let response = self
            .client
            .post(format!("{}/chat/completions", endpoint.base_url))
            .header("Authorization", format!("Bearer {}", endpoint.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let mut stream = response.bytes_stream();
        let mut line_buf: Vec<u8> = Vec::new();
        let mut content = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Request(e.to_string()))?;
            line_buf.extend_from_slice(&chunk);

            while let Some(pos) = line_buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = line_buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim();
                let Some(payload) = line.strip_prefix("data:") else {
                    continue;
                };
                let payload = payload.trim();
                if payload == "[DONE]" {
                    break;
                }
                if let Ok(event) = serde_json::from_str::<serde_json::Value>(payload) {
                    if let Some(fragment) = event
                        .pointer("/choices/0/delta/content")
                        .and_then(|v| v.as_str())
                    {
                        content.push_str(fragment);
                    }
                }
            }
        }

        if content.is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        tracing::info!(
            "completion finished: model={} chars={} latency={:?}",
            endpoint.model_name,
            content.len(),
            start.elapsed()
        );
        Ok(content)
    }
}

#[async_trait]
impl Completion for LlmGateway {
    async fn complete(&self, role: LlmRole, system: &str, user: &str) -> Result<String, LlmError> {
        let endpoint = self
            .settings
            .role_endpoint(role)
            .map_err(|_| LlmError::MissingApiKey(role.env_prefix().to_string()))?;

        let timeout = self.timeout_for(role);
        let label = format!("completion[{role}]");

        let endpoint = &endpoint;
        retry(&self.retry, &label, LlmError::is_retryable, || {
            let attempt = self.stream_once(endpoint, system, user);
            async move {
                match tokio::time::timeout(timeout, attempt).await {
                    Ok(result) => result,
                    Err(_) => Err(LlmError::Timeout(timeout.as_secs())),
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_role_gets_long_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join(".env"));
        let gateway = LlmGateway::new(settings);
        assert_eq!(
            gateway.timeout_for(LlmRole::ReportEngine),
            Duration::from_secs(900)
        );
        assert_eq!(
            gateway.timeout_for(LlmRole::QueryEngine),
            Duration::from_secs(240)
        );
    }

    #[tokio::test]
    async fn missing_api_key_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join(".env"));
        let gateway = LlmGateway::new(settings);
        let err = gateway
            .complete(LlmRole::ForumHost, "system", "user")
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::MissingApiKey(_)));
    }
}
