//! Error types for the formwatch core library.

use std::time::Duration;

/// Top-level error enum for the formwatch core library.
#[derive(Debug, thiserror::Error)]
pub enum FormwatchError {
    #[error("Target error: {0}")]
    Target(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type FormwatchResult<T> = Result<T, FormwatchError>;

/// Failure of a single page capture.
///
/// These never abort a run: the orchestrator turns them into a snapshot with
/// `status = error` and moves on to the next target.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("Missing submission_url and homepage; nothing to capture.")]
    MissingUrl,

    #[error("Navigation timeout after {} ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Script evaluation failed: {0}")]
    Evaluation(String),

    #[error("Browsing context unavailable: {0}")]
    Context(String),

    #[error("Capture cancelled")]
    Cancelled,
}

impl CaptureError {
    /// True when the capture was aborted by the run-level cancellation token
    /// rather than failing on its own.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CaptureError::Cancelled)
    }
}
