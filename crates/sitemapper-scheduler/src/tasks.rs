//! Task definitions: the core data model for scheduled work.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A one-shot, delayed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID.
    pub id: String,
    /// Task name. Selects the handler and drives `has_pending`.
    pub name: String,
    /// Handler input.
    pub payload: serde_json::Value,
    /// Current status.
    pub status: TaskStatus,
    /// Created timestamp.
    pub created_at: DateTime<Utc>,
    /// Earliest time the task may run.
    pub run_at: DateTime<Utc>,
    /// Last time a worker picked the task up.
    pub last_run: Option<DateTime<Utc>>,
    /// How many times a worker picked the task up.
    pub attempts: u32,
    /// Error from the most recent failed attempt.
    pub last_error: Option<String>,
}

/// Task status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed(String),
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed(_) => "failed",
        }
    }

    /// Pending or running.
    pub fn is_live(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }
}

impl Task {
    /// Create a task that becomes due after `delay`.
    pub fn once(name: &str, payload: serde_json::Value, delay: Duration) -> Self {
        let now = Utc::now();
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        Self {
            id: format!("task-{}", uuid::Uuid::new_v4().simple()),
            name: name.to_string(),
            payload,
            status: TaskStatus::Pending,
            created_at: now,
            run_at: now + delay,
            last_run: None,
            attempts: 0,
            last_error: None,
        }
    }

    /// Check if this task should run at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && now >= self.run_at
    }
}

/// Retry behaviour for failed tasks: exponential backoff, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 5,
            max_delay_secs: 300,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let secs = self.base_delay_secs.saturating_mul(1u64 << exp);
        Duration::from_secs(secs.min(self.max_delay_secs))
    }

    /// Whether a task that has made `attempts` attempts may run again.
    pub fn can_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}
