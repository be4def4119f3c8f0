//! LLM gateway
//!
//! Streams chat completions from OpenAI-compatible endpoints selected by
//! role, and post-processes model output (fence stripping, reasoning-preamble
//! removal, JSON repair) so downstream nodes only ever see either valid JSON
//! or a documented fallback.

pub mod client;
pub mod repair;

pub use client::{LlmGateway, LlmGatewayConfig};

use async_trait::async_trait;

use crate::types::{LlmError, LlmRole};

/// Completion capability: `(system, user) -> text` for a given role.
///
/// The gateway is the production implementation; tests substitute scripted
/// responders.
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, role: LlmRole, system: &str, user: &str) -> Result<String, LlmError>;
}
