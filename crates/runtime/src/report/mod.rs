//! Final report assembly
//!
//! The readiness gate compares per-engine artifact counts against a
//! persisted baseline; the compositor renders the final HTML document once
//! the gate opens.

pub mod baseline;
pub mod compositor;

pub use baseline::{FileCountBaseline, ReadinessCheck};
pub use compositor::{ReportCompositor, TaskRecord, TaskStatus};
