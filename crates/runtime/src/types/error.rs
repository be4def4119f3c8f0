//! Error types for the Tidewave runtime

use thiserror::Error;

use super::EngineKind;

/// Main runtime error type
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("Forum error: {0}")]
    Forum(#[from] ForumError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    MissingSetting(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to read environment file {path}: {source}")]
    EnvFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write environment file {path}: {source}")]
    EnvFileWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// LLM gateway errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("No API key configured for role {0}")]
    MissingApiKey(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Streamed response ended without content")]
    EmptyResponse,

    #[error("Completion timed out after {0} seconds")]
    Timeout(u64),
}

impl LlmError {
    /// Transient failures are retried; client-side errors short-circuit.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Request(_) | LlmError::EmptyResponse | LlmError::Timeout(_) => true,
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            LlmError::MissingApiKey(_) => false,
        }
    }
}

/// Search backend errors
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("No API key configured for search backend")]
    MissingApiKey,

    #[error("Request failed: {0}")]
    Request(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl SearchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SearchError::Request(_) => true,
            SearchError::Api { status, .. } => *status == 429 || *status >= 500,
            SearchError::MissingApiKey => false,
        }
    }
}

/// Supervisor / process-management errors
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Engine {0} is already running")]
    AlreadyRunning(EngineKind),

    #[error("Engine {0} is not running")]
    NotRunning(EngineKind),

    #[error("Failed to spawn engine {engine}: {source}")]
    SpawnFailed {
        engine: EngineKind,
        #[source]
        source: std::io::Error,
    },

    #[error("Engine {engine} failed to become healthy: {reason}")]
    StartupFailed { engine: EngineKind, reason: String },
}

/// Forum pipeline errors
#[derive(Error, Debug)]
pub enum ForumError {
    #[error("Failed to write forum log: {0}")]
    Write(#[source] std::io::Error),

    #[error("Failed to read forum log: {0}")]
    Read(#[source] std::io::Error),

    #[error("Forum monitoring is already running")]
    AlreadyMonitoring,
}

/// Report compositor errors
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Report compositor is not initialized")]
    NotInitialized,

    #[error("A report generation task is already running")]
    AlreadyRunning,

    #[error("Input files not ready: {missing:?}")]
    NotReady { missing: Vec<String> },

    #[error("Task {0} does not exist")]
    UnknownTask(String),

    #[error("Report generation failed: {0}")]
    Generation(String),

    #[error("Failed to persist report: {0}")]
    Persist(#[source] std::io::Error),

    #[error("Failed to read baseline file: {0}")]
    Baseline(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_retry_classification() {
        assert!(LlmError::Request("reset".into()).is_retryable());
        assert!(LlmError::Api {
            status: 503,
            message: "overloaded".into()
        }
        .is_retryable());
        assert!(LlmError::Api {
            status: 429,
            message: "rate limited".into()
        }
        .is_retryable());
        assert!(!LlmError::Api {
            status: 401,
            message: "bad key".into()
        }
        .is_retryable());
        assert!(!LlmError::MissingApiKey("FORUM_HOST".into()).is_retryable());
    }

    #[test]
    fn error_rollup() {
        let err: RuntimeError = ReportError::AlreadyRunning.into();
        assert!(err.to_string().contains("already running"));
    }
}
