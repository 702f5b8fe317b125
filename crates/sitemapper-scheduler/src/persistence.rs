//! SQLite-backed persistence for queued tasks.

use crate::tasks::{Task, TaskStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use sitemapper_core::{Result, SitemapError};
use std::path::Path;

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> SitemapError + '_ {
    move |e| SitemapError::Scheduler(format!("{context}: {e}"))
}

/// SQLite-backed persistence store for the task queue.
pub struct SchedulerDb {
    conn: rusqlite::Connection,
}

impl SchedulerDb {
    /// Open or create the scheduler database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(path).map_err(db_err("DB open"))?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Throwaway database, for tests and one-shot runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(db_err("DB open"))?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS scheduler_tasks (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                payload TEXT NOT NULL,           -- JSON
                status TEXT NOT NULL DEFAULT 'pending',
                error TEXT,                      -- failure reason / last error
                created_at TEXT NOT NULL,
                run_at TEXT NOT NULL,
                last_run TEXT,
                attempts INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_scheduler_tasks_name_status
                ON scheduler_tasks (name, status);
         ",
            )
            .map_err(db_err("Migration"))?;
        Ok(())
    }

    /// Save a task (insert or replace).
    pub fn save_task(&self, task: &Task) -> Result<()> {
        let error = match &task.status {
            TaskStatus::Failed(reason) => Some(reason.clone()),
            _ => task.last_error.clone(),
        };

        self.conn
            .execute(
                "INSERT OR REPLACE INTO scheduler_tasks
                 (id, name, payload, status, error, created_at, run_at, last_run, attempts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    task.id,
                    task.name,
                    task.payload.to_string(),
                    task.status.as_str(),
                    error,
                    fmt_time(task.created_at),
                    fmt_time(task.run_at),
                    task.last_run.map(fmt_time),
                    task.attempts,
                ],
            )
            .map_err(db_err("Save task"))?;
        Ok(())
    }

    /// Load all tasks, oldest first.
    pub fn load_tasks(&self) -> Result<Vec<Task>> {
        self.query_tasks(
            "SELECT id, name, payload, status, error, created_at, run_at, last_run, attempts
             FROM scheduler_tasks ORDER BY run_at, created_at",
        )
    }

    /// Load pending and running tasks, oldest first.
    pub fn load_live_tasks(&self) -> Result<Vec<Task>> {
        self.query_tasks(
            "SELECT id, name, payload, status, error, created_at, run_at, last_run, attempts
             FROM scheduler_tasks WHERE status IN ('pending', 'running')
             ORDER BY run_at, created_at",
        )
    }

    fn query_tasks(&self, sql: &str) -> Result<Vec<Task>> {
        let mut stmt = self.conn.prepare(sql).map_err(db_err("Load tasks"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(StoredTask {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    payload: row.get(2)?,
                    status: row.get(3)?,
                    error: row.get(4)?,
                    created_at: row.get(5)?,
                    run_at: row.get(6)?,
                    last_run: row.get(7)?,
                    attempts: row.get(8)?,
                })
            })
            .map_err(db_err("Load tasks"))?;

        let mut tasks = Vec::new();
        for row in rows {
            match row {
                Ok(stored) => {
                    if let Some(task) = stored.into_task() {
                        tasks.push(task);
                    }
                }
                Err(e) => tracing::warn!("⚠️ Skipping unreadable task row: {e}"),
            }
        }
        Ok(tasks)
    }

    /// Mark a pending task as running with the claimer's attempt count.
    /// Returns false when another queue claimed or removed it first.
    pub fn claim_task(&self, task: &Task) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE scheduler_tasks SET status = 'running', attempts = ?2, last_run = ?3
                 WHERE id = ?1 AND status = 'pending'",
                rusqlite::params![
                    task.id,
                    task.attempts,
                    task.last_run.map(fmt_time),
                ],
            )
            .map_err(db_err("Claim task"))?;
        Ok(changed == 1)
    }

    /// Delete a task.
    pub fn delete_task(&self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM scheduler_tasks WHERE id = ?1", [id])
            .map_err(db_err("Delete task"))?;
        Ok(())
    }

    /// Drop completed and failed tasks last touched before `before`.
    /// Returns rows removed.
    pub fn prune_finished(&self, before: DateTime<Utc>) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM scheduler_tasks
                 WHERE status IN ('completed', 'failed') AND COALESCE(last_run, run_at) < ?1",
                [fmt_time(before)],
            )
            .map_err(db_err("Prune tasks"))
    }
}

/// Raw `scheduler_tasks` row.
struct StoredTask {
    id: String,
    name: String,
    payload: String,
    status: String,
    error: Option<String>,
    created_at: String,
    run_at: String,
    last_run: Option<String>,
    attempts: u32,
}

impl StoredTask {
    fn into_task(self) -> Option<Task> {
        let payload = match serde_json::from_str(&self.payload) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(
                    "⚠️ Skipping task '{}' ({}): unreadable payload: {e}",
                    self.name,
                    self.id
                );
                return None;
            }
        };
        let (Some(created_at), Some(run_at)) = (parse_time(&self.created_at), parse_time(&self.run_at))
        else {
            tracing::warn!("⚠️ Skipping task '{}' ({}): bad timestamps", self.name, self.id);
            return None;
        };
        let status = match self.status.as_str() {
            "pending" => TaskStatus::Pending,
            "running" => TaskStatus::Running,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed(self.error.clone().unwrap_or_else(|| "unknown".into())),
            other => {
                tracing::warn!("⚠️ Skipping task '{}' ({}): unknown status '{other}'", self.name, self.id);
                return None;
            }
        };

        Some(Task {
            id: self.id,
            name: self.name,
            payload,
            status,
            created_at,
            run_at,
            last_run: self.last_run.as_deref().and_then(parse_time),
            attempts: self.attempts,
            last_error: self.error,
        })
    }
}

/// Fixed-width UTC timestamps so SQL string comparison orders correctly.
fn fmt_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_open_and_migrate() {
        let dir = tempfile::tempdir().unwrap();
        let db = SchedulerDb::open(&dir.path().join("sched.db")).unwrap();
        assert!(db.load_tasks().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load_task() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let task = Task::once(
            "sitemap.write_batch",
            serde_json::json!({"index": 2}),
            Duration::from_secs(10),
        );
        db.save_task(&task).unwrap();

        let loaded = db.load_tasks().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "sitemap.write_batch");
        assert_eq!(loaded[0].payload["index"], 2);
        assert_eq!(loaded[0].status, TaskStatus::Pending);
        assert_eq!(loaded[0].run_at.timestamp(), task.run_at.timestamp());
    }

    #[test]
    fn test_failed_reason_roundtrips() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let mut task = Task::once("t", serde_json::Value::Null, Duration::ZERO);
        task.status = TaskStatus::Failed("disk full".into());
        db.save_task(&task).unwrap();

        let loaded = db.load_tasks().unwrap();
        assert_eq!(loaded[0].status, TaskStatus::Failed("disk full".into()));
    }

    #[test]
    fn test_delete_and_prune() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let keep = Task::once("keep", serde_json::Value::Null, Duration::ZERO);
        let mut done = Task::once("done", serde_json::Value::Null, Duration::ZERO);
        done.status = TaskStatus::Completed;
        let mut broken = Task::once("broken", serde_json::Value::Null, Duration::ZERO);
        broken.status = TaskStatus::Failed("bad payload".into());
        let gone = Task::once("gone", serde_json::Value::Null, Duration::ZERO);
        for task in [&keep, &done, &broken, &gone] {
            db.save_task(task).unwrap();
        }

        db.delete_task(&gone.id).unwrap();
        let removed = db
            .prune_finished(Utc::now() + chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(removed, 2);

        let names: Vec<_> = db.load_tasks().unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["keep".to_string()]);
    }

    #[test]
    fn test_claim_succeeds_once() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let mut task = Task::once("rebuild", serde_json::Value::Null, Duration::ZERO);
        db.save_task(&task).unwrap();

        task.attempts = 1;
        task.last_run = Some(Utc::now());
        assert!(db.claim_task(&task).unwrap());
        assert!(!db.claim_task(&task).unwrap());

        let live = db.load_live_tasks().unwrap();
        assert_eq!(live[0].status, TaskStatus::Running);
        assert_eq!(live[0].attempts, 1);
    }

    #[test]
    fn test_corrupt_rows_are_skipped() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let good = Task::once("good", serde_json::json!({"index": 0}), Duration::ZERO);
        db.save_task(&good).unwrap();
        db.conn
            .execute(
                "INSERT INTO scheduler_tasks (id, name, payload, status, created_at, run_at)
                 VALUES ('bad-1', 'sitemap.write_batch', '{not json', 'pending', ?1, ?1)",
                [Utc::now().to_rfc3339()],
            )
            .unwrap();
        db.conn
            .execute(
                "INSERT INTO scheduler_tasks (id, name, payload, status, created_at, run_at)
                 VALUES ('bad-2', 'sitemap.write_batch', 'null', 'pending', 'yesterday', 'soon')",
                [],
            )
            .unwrap();

        let live = db.load_live_tasks().unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, good.id);
    }
}
