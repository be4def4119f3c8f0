//! Tidewave runtime
//!
//! Core orchestration layer of the Tidewave public-opinion analysis
//! platform: supervises the three research engine workers, drives their
//! shared research state machine, multiplexes their logs into the
//! cross-engine forum, and composes the final report once every engine has
//! published fresh results.

pub mod api;
pub mod config;
pub mod engine;
pub mod forum;
pub mod llm;
pub mod prompts;
pub mod report;
pub mod research;
pub mod retry;
pub mod search;
pub mod supervisor;
pub mod types;

pub use api::{Orchestrator, OrchestratorConfig, OrchestratorServer};
pub use config::Settings;
pub use engine::{init_engine_logging, EngineWorker};
pub use forum::{ForumHost, ForumLog, LogTailer, TailerConfig};
pub use llm::{Completion, LlmGateway};
pub use report::{FileCountBaseline, ReportCompositor};
pub use research::{ReportState, ResearchAgent, ResearchAgentConfig};
pub use retry::{retry, retry_graceful, RetryConfig};
pub use search::{HttpSearchClient, SearchProvider, SearchTool};
pub use supervisor::{Supervisor, SupervisorConfig};
pub use types::*;
