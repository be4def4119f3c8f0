//! Cross-engine forum pipeline
//!
//! Tails the three engine logs, extracts summary-node output, publishes it to
//! the shared forum transcript, and periodically synthesizes moderator
//! guidance from the buffered utterances.

pub mod host;
pub mod log;
pub mod tailer;

pub use host::ForumHost;
pub use log::{latest_host_speech, ForumLog, ForumMessage};
pub use tailer::{LogTailer, TailerConfig, TailerHandle};
