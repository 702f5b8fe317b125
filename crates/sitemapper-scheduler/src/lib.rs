//! # Sitemapper Scheduler
//!
//! Lightweight delayed-task queue used to sequence sitemap rebuilds.
//!
//! ## Design Principles
//! - No external broker: tasks live in memory, mirrored to SQLite
//! - Named one-shot tasks with a JSON payload and a "not before" time
//! - `has_pending(name)` doubles as a de-duplication guard; only tasks that
//!   have not started count
//! - Failed tasks are retried with exponential backoff (at-least-once)
//! - Several processes may share one database: live tasks are reloaded before
//!   each claim and a claim is a conditional `UPDATE`
//!
//! ## Architecture
//! ```text
//! TaskScheduler::schedule("sitemap.rebuild", payload, 300s)
//!   └── TaskQueue (Vec<Task> + SchedulerDb)
//!         └── spawn_worker (tokio interval)
//!               ├── take_due(now) → reload, claim → Running
//!               ├── HandlerRegistry → handler.handle(&task)  (blocking pool)
//!               └── Ok → complete (row deleted) · Err → fail → backoff / Failed
//! ```

pub mod engine;
pub mod persistence;
pub mod tasks;

pub use engine::{
    HandlerRegistry, QueueHandle, RetryStats, TaskHandle, TaskHandler, TaskQueue, TaskScheduler,
    drain, run_due, spawn_worker,
};
pub use persistence::SchedulerDb;
pub use tasks::{RetryPolicy, Task, TaskStatus};
