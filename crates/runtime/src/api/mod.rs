//! Orchestrator HTTP API
//!
//! External control surface: system start, per-engine start/stop, search
//! fan-out, forum access, report generation, and configuration. Every
//! response carries a `{success: bool, ...}` envelope; errors are non-2xx
//! with `{success: false, message}`.

pub mod orchestrator;
pub mod routes;
pub mod server;
pub mod types;

pub use orchestrator::{Orchestrator, OrchestratorConfig, StartRejection};
pub use server::OrchestratorServer;
