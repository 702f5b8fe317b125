//! Task queue engine: holds delayed tasks, hands out due ones, applies the
//! retry policy. Uses tokio::interval for the worker loop (sleeps between checks).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sitemapper_core::{Result, SitemapError};

use crate::persistence::SchedulerDb;
use crate::tasks::{RetryPolicy, Task, TaskStatus};

/// Returned by [`TaskScheduler::schedule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: String,
    pub name: String,
    pub run_at: DateTime<Utc>,
}

/// The queue API the pipeline consumes.
pub trait TaskScheduler: Send + Sync {
    /// Queue `name` to run no earlier than `delay` from now.
    fn schedule(&self, name: &str, payload: serde_json::Value, delay: Duration) -> Result<TaskHandle>;

    /// Whether a task with this name is waiting to start. A task that is
    /// already running does not count.
    fn has_pending(&self, name: &str) -> Result<bool>;
}

/// Counters since the queue was opened.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryStats {
    pub completed: u64,
    pub retried: u64,
    pub failed: u64,
}

/// Failed tasks kept in memory for inspection.
pub const FAILED_HISTORY: usize = 32;

/// How long finished rows stay in the database.
pub const FINISHED_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// The task queue. With a database attached the database is authoritative:
/// other processes may add or claim tasks, so live tasks are reloaded before
/// every claim.
pub struct TaskQueue {
    tasks: Vec<Task>,
    failed: VecDeque<Task>,
    db: Option<SchedulerDb>,
    retry: RetryPolicy,
    stats: RetryStats,
}

impl TaskQueue {
    /// Create an in-memory queue.
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            tasks: Vec::new(),
            failed: VecDeque::new(),
            db: None,
            retry,
            stats: RetryStats::default(),
        }
    }

    /// Create a queue backed by `db`, reloading its live tasks.
    pub fn with_db(db: SchedulerDb, retry: RetryPolicy) -> Result<Self> {
        let tasks = db.load_live_tasks()?;
        tracing::debug!("📂 Loaded {} live tasks", tasks.len());
        Ok(Self {
            tasks,
            failed: VecDeque::new(),
            db: Some(db),
            retry,
            stats: RetryStats::default(),
        })
    }

    /// Add a task.
    pub fn add_task(&mut self, task: Task) -> Result<TaskHandle> {
        self.persist(&task)?;
        tracing::info!(
            "📅 Task queued: '{}' ({}) at {}",
            task.name,
            task.id,
            task.run_at.format("%H:%M:%S")
        );
        let handle = TaskHandle {
            id: task.id.clone(),
            name: task.name.clone(),
            run_at: task.run_at,
        };
        self.tasks.push(task);
        Ok(handle)
    }

    /// Reload live tasks from the database, picking up tasks queued or
    /// claimed by other processes. No-op without a database.
    pub fn refresh(&mut self) -> Result<()> {
        if let Some(db) = &self.db {
            self.tasks = db.load_live_tasks()?;
        }
        Ok(())
    }

    /// Put tasks left `Running` by a crashed worker back to `Pending`.
    /// Only the worker that owns the queue may call this; another process
    /// would steal tasks that are genuinely running.
    pub fn recover_interrupted(&mut self) -> Result<usize> {
        self.refresh()?;
        let mut recovered = 0;
        for task in self.tasks.iter_mut().filter(|t| t.status == TaskStatus::Running) {
            tracing::warn!("♻️ Recovering interrupted task '{}' ({})", task.name, task.id);
            task.status = TaskStatus::Pending;
            if let Some(db) = &self.db {
                db.save_task(task)?;
            }
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Whether a task with this name is waiting to start.
    pub fn has_pending(&self, name: &str) -> bool {
        self.tasks
            .iter()
            .any(|t| t.name == name && t.status == TaskStatus::Pending)
    }

    /// Number of waiting tasks with this name.
    pub fn pending_count(&self, name: &str) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.name == name && t.status == TaskStatus::Pending)
            .count()
    }

    /// Pending and running tasks.
    pub fn list_tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Most recent failures, oldest first (at most [`FAILED_HISTORY`]).
    pub fn failed_tasks(&self) -> impl Iterator<Item = &Task> {
        self.failed.iter()
    }

    /// Any live task at all.
    pub fn is_idle(&self) -> bool {
        !self.tasks.iter().any(|t| t.status.is_live())
    }

    pub fn stats(&self) -> &RetryStats {
        &self.stats
    }

    /// Earliest run time among pending tasks.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.run_at)
            .min()
    }

    /// Claim every task due at `now`, in run order, marking them running.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Result<Vec<Task>> {
        self.refresh()?;
        let mut due: Vec<usize> = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_due(now))
            .map(|(i, _)| i)
            .collect();
        due.sort_by_key(|&i| (self.tasks[i].run_at, self.tasks[i].created_at));

        let mut claimed = Vec::with_capacity(due.len());
        let mut lost = Vec::new();
        for i in due {
            let task = &mut self.tasks[i];
            task.status = TaskStatus::Running;
            task.attempts += 1;
            task.last_run = Some(Utc::now());
            let won = match &self.db {
                Some(db) => db.claim_task(task)?,
                None => true,
            };
            if won {
                claimed.push(task.clone());
            } else {
                tracing::debug!("Task '{}' ({}) claimed elsewhere", task.name, task.id);
                lost.push(task.id.clone());
            }
        }
        self.tasks.retain(|t| !lost.contains(&t.id));
        Ok(claimed)
    }

    /// Mark a claimed task as done and forget it.
    pub fn complete(&mut self, id: &str) -> Result<()> {
        let Some(pos) = self.tasks.iter().position(|t| t.id == id) else {
            return Err(SitemapError::Scheduler(format!("unknown task {id}")));
        };
        let task = self.tasks.remove(pos);
        if let Some(db) = &self.db {
            db.delete_task(&task.id)?;
        }
        self.stats.completed += 1;
        tracing::debug!("✅ Task '{}' completed ({})", task.name, task.id);
        Ok(())
    }

    /// Record a failed attempt: reschedule with backoff while the error is
    /// transient and attempts remain, otherwise mark the task failed.
    pub fn fail(&mut self, id: &str, error: &SitemapError) -> Result<TaskStatus> {
        let retry = self.retry;
        let Some(pos) = self.tasks.iter().position(|t| t.id == id) else {
            return Err(SitemapError::Scheduler(format!("unknown task {id}")));
        };
        let task = &mut self.tasks[pos];

        task.last_error = Some(error.to_string());
        if error.is_transient() && retry.can_retry(task.attempts) {
            let delay = retry.backoff(task.attempts);
            task.status = TaskStatus::Pending;
            task.run_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
            self.stats.retried += 1;
            tracing::warn!(
                "🔁 Task '{}' attempt {}/{} failed: {error}; retry in {}s",
                task.name,
                task.attempts,
                retry.max_attempts,
                delay.as_secs()
            );
        } else {
            task.status = TaskStatus::Failed(error.to_string());
            self.stats.failed += 1;
            tracing::error!(
                "❌ Task '{}' failed after {} attempt(s): {error}",
                task.name,
                task.attempts
            );
        }

        let status = task.status.clone();
        if status == TaskStatus::Pending {
            let snapshot = task.clone();
            self.persist(&snapshot)?;
        } else {
            let task = self.tasks.remove(pos);
            self.persist(&task)?;
            if self.failed.len() == FAILED_HISTORY {
                self.failed.pop_front();
            }
            self.failed.push_back(task);
        }
        Ok(status)
    }

    /// Delete finished rows older than `retention`. Returns rows removed.
    pub fn prune_history(&mut self, retention: Duration) -> Result<usize> {
        let Some(db) = &self.db else {
            return Ok(0);
        };
        let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::zero());
        let removed = db.prune_finished(cutoff)?;
        if removed > 0 {
            tracing::debug!("🧹 Pruned {removed} finished task(s)");
        }
        Ok(removed)
    }

    fn persist(&self, task: &Task) -> Result<()> {
        match &self.db {
            Some(db) => db.save_task(task),
            None => Ok(()),
        }
    }
}

/// Cloneable, thread-safe handle to a [`TaskQueue`].
#[derive(Clone)]
pub struct QueueHandle {
    inner: Arc<Mutex<TaskQueue>>,
}

impl QueueHandle {
    pub fn new(queue: TaskQueue) -> Self {
        Self {
            inner: Arc::new(Mutex::new(queue)),
        }
    }

    /// Lock the queue. A poisoned lock is reported, not unwrapped.
    pub fn lock(&self) -> Result<MutexGuard<'_, TaskQueue>> {
        self.inner
            .lock()
            .map_err(|e| SitemapError::Scheduler(format!("queue lock poisoned: {e}")))
    }
}

impl TaskScheduler for QueueHandle {
    fn schedule(&self, name: &str, payload: serde_json::Value, delay: Duration) -> Result<TaskHandle> {
        self.lock()?.add_task(Task::once(name, payload, delay))
    }

    fn has_pending(&self, name: &str) -> Result<bool> {
        let mut queue = self.lock()?;
        queue.refresh()?;
        Ok(queue.has_pending(name))
    }
}

/// Something that executes tasks of one name.
pub trait TaskHandler: Send + Sync {
    fn handle(&self, task: &Task) -> Result<()>;
}

impl<F> TaskHandler for F
where
    F: Fn(&Task) -> Result<()> + Send + Sync,
{
    fn handle(&self, task: &Task) -> Result<()> {
        self(task)
    }
}

/// Maps task names to handlers.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

fn execute(registry: &HandlerRegistry, task: &Task) -> Result<()> {
    match registry.get(&task.name) {
        Some(handler) => handler.handle(task),
        None => Err(SitemapError::Scheduler(format!(
            "no handler registered for '{}'",
            task.name
        ))),
    }
}

fn report(queue: &QueueHandle, task: &Task, outcome: Result<()>) -> Result<()> {
    let mut q = queue.lock()?;
    match outcome {
        Ok(()) => q.complete(&task.id),
        Err(e) => q.fail(&task.id, &e).map(|_| ()),
    }
}

/// Run every task due at `now` on the current thread. Returns how many ran.
pub fn run_due(queue: &QueueHandle, registry: &HandlerRegistry, now: DateTime<Utc>) -> Result<usize> {
    let due = queue.lock()?.take_due(now)?;
    for task in &due {
        let outcome = execute(registry, task);
        report(queue, task, outcome)?;
    }
    Ok(due.len())
}

/// Run tasks back to back, ignoring their delays, until the queue is idle
/// or `max_rounds` passes ran. Returns the total number of executions.
pub fn drain(queue: &QueueHandle, registry: &HandlerRegistry, max_rounds: usize) -> Result<usize> {
    let mut total = 0;
    for _ in 0..max_rounds {
        let Some(next) = queue.lock()?.next_due() else {
            break;
        };
        total += run_due(queue, registry, next)?;
    }
    Ok(total)
}

const PRUNE_EVERY: Duration = Duration::from_secs(3600);

/// Spawn-able worker loop: every `check_interval` claim due tasks and run
/// them on the blocking pool, one after another.
pub async fn spawn_worker(queue: QueueHandle, registry: Arc<HandlerRegistry>, check_interval: Duration) {
    tracing::info!(
        "⏰ Worker started (check every {}ms, handlers: {:?})",
        check_interval.as_millis(),
        registry.names()
    );

    let mut interval = tokio::time::interval(check_interval);
    let mut last_prune: Option<std::time::Instant> = None;

    loop {
        interval.tick().await;

        if last_prune.is_none_or(|t| t.elapsed() >= PRUNE_EVERY) {
            if let Err(e) = queue.lock().and_then(|mut q| q.prune_history(FINISHED_RETENTION)) {
                tracing::warn!("⚠️ Failed to prune task history: {e}");
            }
            last_prune = Some(std::time::Instant::now());
        }

        let due = match queue.lock().and_then(|mut q| q.take_due(Utc::now())) {
            Ok(due) => due,
            Err(e) => {
                tracing::warn!("⚠️ Failed to claim due tasks: {e}");
                continue;
            }
        };

        for task in due {
            tracing::info!("🔔 Running task '{}' (attempt {})", task.name, task.attempts);
            let reg = Arc::clone(&registry);
            let job = task.clone();
            let outcome = match tokio::task::spawn_blocking(move || execute(&reg, &job)).await {
                Ok(outcome) => outcome,
                Err(e) => Err(SitemapError::Scheduler(format!("handler panicked: {e}"))),
            };
            if let Err(e) = report(&queue, &task, outcome) {
                tracing::warn!("⚠️ Failed to record outcome of '{}': {e}", task.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn queue() -> QueueHandle {
        QueueHandle::new(TaskQueue::new(RetryPolicy {
            max_attempts: 3,
            base_delay_secs: 1,
            max_delay_secs: 10,
        }))
    }

    #[test]
    fn test_schedule_and_has_pending() {
        let q = queue();
        assert!(!q.has_pending("rebuild").unwrap());
        let handle = q
            .schedule("rebuild", serde_json::Value::Null, Duration::from_secs(300))
            .unwrap();
        assert_eq!(handle.name, "rebuild");
        assert!(q.has_pending("rebuild").unwrap());
        assert!(!q.has_pending("other").unwrap());
    }

    #[test]
    fn test_take_due_respects_delay_and_order() {
        let q = queue();
        q.schedule("b", serde_json::json!(2), Duration::from_secs(10)).unwrap();
        q.schedule("a", serde_json::json!(1), Duration::ZERO).unwrap();
        q.schedule("c", serde_json::json!(3), Duration::from_secs(3600)).unwrap();

        let now = Utc::now();
        let due = q.lock().unwrap().take_due(now).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].name, "a");
        assert_eq!(due[0].attempts, 1);

        let later = now + chrono::Duration::seconds(20);
        let due = q.lock().unwrap().take_due(later).unwrap();
        assert_eq!(due.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(), vec!["b"]);

        // A running task no longer blocks a new one of the same name.
        assert!(!q.has_pending("b").unwrap());
        assert!(!q.lock().unwrap().is_idle());
    }

    #[test]
    fn test_run_due_completes_and_removes() {
        let q = queue();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let mut registry = HandlerRegistry::new();
        registry.register(
            "job",
            Arc::new(move |_task: &Task| -> Result<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        q.schedule("job", serde_json::Value::Null, Duration::ZERO).unwrap();
        let ran = run_due(&q, &registry, Utc::now()).unwrap();
        assert_eq!(ran, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!q.has_pending("job").unwrap());
        assert_eq!(q.lock().unwrap().stats().completed, 1);
    }

    #[test]
    fn test_transient_failure_retries_then_fails() {
        let q = queue();
        let mut registry = HandlerRegistry::new();
        registry.register(
            "flaky",
            Arc::new(|_task: &Task| -> Result<()> {
                Err(SitemapError::LockContention {
                    path: "sitemap.xml".into(),
                    waited_ms: 5,
                })
            }),
        );
        q.schedule("flaky", serde_json::Value::Null, Duration::ZERO).unwrap();

        let far = Utc::now() + chrono::Duration::days(1);
        for _ in 0..3 {
            run_due(&q, &registry, far).unwrap();
        }

        let guard = q.lock().unwrap();
        assert!(guard.list_tasks().is_empty());
        let task = guard.failed_tasks().next().unwrap();
        assert_eq!(task.attempts, 3);
        assert!(matches!(task.status, TaskStatus::Failed(_)));
        assert_eq!(guard.stats().retried, 2);
        assert_eq!(guard.stats().failed, 1);
        drop(guard);
        assert!(!q.has_pending("flaky").unwrap());
    }

    #[test]
    fn test_permanent_failure_does_not_retry() {
        let q = queue();
        let mut registry = HandlerRegistry::new();
        registry.register(
            "broken",
            Arc::new(|_task: &Task| -> Result<()> {
                Err(SitemapError::Payload("missing field".into()))
            }),
        );
        q.schedule("broken", serde_json::Value::Null, Duration::ZERO).unwrap();
        run_due(&q, &registry, Utc::now()).unwrap();

        let guard = q.lock().unwrap();
        let task = guard.failed_tasks().next().unwrap();
        assert!(matches!(task.status, TaskStatus::Failed(_)));
        assert_eq!(guard.stats().retried, 0);
    }

    #[test]
    fn test_missing_handler_fails_task() {
        let q = queue();
        q.schedule("orphan", serde_json::Value::Null, Duration::ZERO).unwrap();
        run_due(&q, &HandlerRegistry::new(), Utc::now()).unwrap();
        assert!(!q.has_pending("orphan").unwrap());
    }

    #[test]
    fn test_drain_ignores_delays() {
        let q = queue();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let mut registry = HandlerRegistry::new();
        registry.register(
            "step",
            Arc::new(move |task: &Task| -> Result<()> {
                log.lock().unwrap().push(task.payload.as_u64().unwrap_or_default());
                Ok(())
            }),
        );
        for i in 0..3u64 {
            q.schedule("step", serde_json::json!(i), Duration::from_secs(60 * (3 - i)))
                .unwrap();
        }

        let ran = drain(&q, &registry, 10).unwrap();
        assert_eq!(ran, 3);
        assert_eq!(*seen.lock().unwrap(), vec![2, 1, 0]);
        assert!(q.lock().unwrap().is_idle());
    }

    #[test]
    fn test_persisted_queue_recovers_running_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        {
            let q = QueueHandle::new(
                TaskQueue::with_db(SchedulerDb::open(&path).unwrap(), RetryPolicy::default())
                    .unwrap(),
            );
            q.schedule("rebuild", serde_json::Value::Null, Duration::ZERO).unwrap();
            q.schedule("later", serde_json::Value::Null, Duration::from_secs(600)).unwrap();
            // Claimed but never reported, as after a crash mid-task.
            let claimed = q.lock().unwrap().take_due(Utc::now()).unwrap();
            assert_eq!(claimed.len(), 1);
        }

        let mut reopened =
            TaskQueue::with_db(SchedulerDb::open(&path).unwrap(), RetryPolicy::default()).unwrap();
        assert!(!reopened.has_pending("rebuild"));
        assert_eq!(reopened.recover_interrupted().unwrap(), 1);
        assert_eq!(reopened.list_tasks().len(), 2);
        assert!(reopened.has_pending("rebuild"));
        let rebuild = reopened
            .list_tasks()
            .iter()
            .find(|t| t.name == "rebuild")
            .unwrap();
        assert_eq!(rebuild.status, TaskStatus::Pending);
        assert_eq!(rebuild.attempts, 1);
    }

    #[test]
    fn test_failed_history_is_capped() {
        let q = queue();
        let mut registry = HandlerRegistry::new();
        registry.register(
            "broken",
            Arc::new(|task: &Task| -> Result<()> {
                Err(SitemapError::Payload(format!("bad {}", task.payload)))
            }),
        );
        for i in 0..FAILED_HISTORY + 5 {
            q.schedule("broken", serde_json::json!(i), Duration::ZERO).unwrap();
        }
        run_due(&q, &registry, Utc::now()).unwrap();

        let guard = q.lock().unwrap();
        assert!(guard.list_tasks().is_empty());
        let failed: Vec<_> = guard.failed_tasks().collect();
        assert_eq!(failed.len(), FAILED_HISTORY);
        assert_eq!(failed[0].payload, serde_json::json!(5));
        assert_eq!(guard.stats().failed, (FAILED_HISTORY + 5) as u64);
    }

    #[test]
    fn test_completed_rows_are_deleted_and_failures_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let q = QueueHandle::new(
            TaskQueue::with_db(SchedulerDb::open(&path).unwrap(), RetryPolicy::default()).unwrap(),
        );
        let mut registry = HandlerRegistry::new();
        registry.register("ok", Arc::new(|_task: &Task| -> Result<()> { Ok(()) }));
        registry.register(
            "broken",
            Arc::new(|_task: &Task| -> Result<()> { Err(SitemapError::Payload("nope".into())) }),
        );
        for _ in 0..5 {
            q.schedule("ok", serde_json::Value::Null, Duration::ZERO).unwrap();
        }
        q.schedule("broken", serde_json::Value::Null, Duration::ZERO).unwrap();
        run_due(&q, &registry, Utc::now()).unwrap();

        let rows = SchedulerDb::open(&path).unwrap().load_tasks().unwrap();
        assert_eq!(rows.len(), 1);
        assert!(matches!(rows[0].status, TaskStatus::Failed(_)));

        assert_eq!(q.lock().unwrap().prune_history(FINISHED_RETENTION).unwrap(), 0);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(q.lock().unwrap().prune_history(Duration::ZERO).unwrap(), 1);
        assert!(SchedulerDb::open(&path).unwrap().load_tasks().unwrap().is_empty());
    }

    #[test]
    fn test_queues_on_one_database_share_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let open = || {
            QueueHandle::new(
                TaskQueue::with_db(SchedulerDb::open(&path).unwrap(), RetryPolicy::default())
                    .unwrap(),
            )
        };
        let worker = open();
        let cli = open();

        cli.schedule("rebuild", serde_json::Value::Null, Duration::ZERO).unwrap();
        assert!(worker.has_pending("rebuild").unwrap());

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let mut registry = HandlerRegistry::new();
        registry.register(
            "rebuild",
            Arc::new(move |_task: &Task| -> Result<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let far = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(run_due(&worker, &registry, far).unwrap(), 1);
        // The other queue still holds its stale copy in memory, but the
        // claim goes through the database.
        assert_eq!(run_due(&cli, &registry, far).unwrap(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!cli.has_pending("rebuild").unwrap());
    }

    #[test]
    fn test_claim_race_has_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let a = TaskQueue::with_db(SchedulerDb::open(&path).unwrap(), RetryPolicy::default());
        let mut a = a.unwrap();
        a.add_task(Task::once("rebuild", serde_json::Value::Null, Duration::ZERO))
            .unwrap();
        let mut b = TaskQueue::with_db(SchedulerDb::open(&path).unwrap(), RetryPolicy::default())
            .unwrap();

        let now = Utc::now();
        assert_eq!(a.take_due(now).unwrap().len(), 1);
        assert!(b.take_due(now).unwrap().is_empty());
        assert_eq!(b.list_tasks()[0].status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_worker_runs_due_task() {
        let q = queue();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let mut registry = HandlerRegistry::new();
        registry.register(
            "tick",
            Arc::new(move |_task: &Task| -> Result<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        q.schedule("tick", serde_json::Value::Null, Duration::ZERO).unwrap();

        let worker = tokio::spawn(spawn_worker(
            q.clone(),
            Arc::new(registry),
            Duration::from_millis(10),
        ));
        for _ in 0..100 {
            if hits.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        worker.abort();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!q.has_pending("tick").unwrap());
    }
}
