//! Engine worker process
//!
//! One long-running process per engine: hosts the research state machine,
//! writes the structured wire-format log the forum tailer consumes, and
//! exposes a small HTTP surface for health checks and search requests.

pub mod logfmt;
pub mod worker;

pub use logfmt::{init_engine_logging, WireFormat};
pub use worker::EngineWorker;
