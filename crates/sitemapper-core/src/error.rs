//! Error type shared across the sitemapper crates.

use std::path::PathBuf;

/// Every failure the pipeline can report.
///
/// Task handlers return these to the scheduler, which retries the task
/// according to its retry policy.
#[derive(Debug, thiserror::Error)]
pub enum SitemapError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The sitemap lock stayed contended past the configured wait.
    #[error("Lock contention on {path:?} (waited {waited_ms}ms)")]
    LockContention { path: PathBuf, waited_ms: u64 },

    #[error("Content store error: {0}")]
    ContentStore(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Invalid task payload: {0}")]
    Payload(String),

    /// A batch ran before its predecessor landed in the file.
    #[error("Batch {index} not ready (next expected batch is {expected})")]
    BatchNotReady { index: usize, expected: usize },

    #[error("Ledger error: {0}")]
    Ledger(String),
}

impl SitemapError {
    /// Whether retrying the same task later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::LockContention { .. } | Self::BatchNotReady { .. } | Self::ContentStore(_)
        )
    }
}

impl From<serde_json::Error> for SitemapError {
    fn from(e: serde_json::Error) -> Self {
        Self::Payload(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SitemapError>;
