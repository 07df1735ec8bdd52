//! A3S Transfer Core - shared types for the OCI transfer engine.
//!
//! Error taxonomy, progress sinks, whole-call retry helpers and layered
//! configuration used by the transfer crate and the CLI.

pub mod config;
pub mod error;
pub mod progress;
pub mod retry;

// Re-export commonly used types
pub use config::TransferConfig;
pub use error::{OciError, Result};
pub use progress::{DiscardProgress, LogProgress, ProgressSink, ProgressWriter};
pub use retry::{retry_with_backoff, with_deadline};

/// A3S Transfer version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
