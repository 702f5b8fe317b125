//! Single point of access to the sitemap file.
//!
//! Every mutation (header, batch fragments, trailer) happens while holding an
//! exclusive advisory lock on the sitemap itself, scoped to one operation.
//! Progress of the current rebuild lives in a JSON ledger next to the file
//! (`sitemap.xml.state.json`), which is only read and written under that lock:
//!
//! ```text
//! begin(gen, total, header)      truncate → header → ledger{next_batch: 0}
//! append_batch(batch 0..total)   index == next_batch → append, next_batch += 1
//!                                index <  next_batch → AlreadyWritten (retry no-op)
//!                                index >  next_batch → BatchNotReady (queue retries)
//!                                other generation    → Stale
//! next_batch == total            trailer appended, ledger.completed = true
//! ```

use std::fs::{File, OpenOptions, TryLockError};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitemapper_core::{Batch, Result, SitemapError};

const LOCK_POLL: Duration = Duration::from_millis(25);

/// Progress of the rebuild that currently owns the sitemap file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildLedger {
    pub generation: String,
    pub total_batches: usize,
    /// Index of the batch allowed to append next.
    pub next_batch: usize,
    /// File length after the last committed write.
    pub committed_len: u64,
    pub completed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// What `append_batch` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Fragment written; `completed` when the trailer went out with it.
    Appended { completed: bool },
    /// This batch already landed; nothing written.
    AlreadyWritten,
    /// The batch belongs to a superseded rebuild; nothing written.
    Stale,
}

/// Exclusive lock on an open file, released on drop.
struct FileLock {
    file: File,
}

impl FileLock {
    fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let started = Instant::now();
        loop {
            match file.try_lock() {
                Ok(()) => return Ok(Self { file }),
                Err(TryLockError::WouldBlock) => {
                    if started.elapsed() >= timeout {
                        return Err(SitemapError::LockContention {
                            path: path.to_path_buf(),
                            waited_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    std::thread::sleep(LOCK_POLL);
                }
                Err(TryLockError::Error(e)) => return Err(SitemapError::Io(e)),
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!("⚠️ Failed to release sitemap lock: {e}");
        }
    }
}

/// Lock-guarded writer for the sitemap file and its ledger.
#[derive(Debug, Clone)]
pub struct SitemapAppender {
    path: PathBuf,
    lock_timeout: Duration,
}

impl SitemapAppender {
    pub fn new(path: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            lock_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ledger_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".state.json");
        PathBuf::from(name)
    }

    /// Start a rebuild: replace the file with `header` and reset the ledger.
    pub fn begin(&self, generation: &str, total_batches: usize, header: &str) -> Result<RebuildLedger> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let lock = FileLock::acquire(&self.path, self.lock_timeout)?;
        let mut file = &lock.file;

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(header.as_bytes())?;
        file.flush()?;
        file.sync_data()?;

        let ledger = RebuildLedger {
            generation: generation.to_string(),
            total_batches,
            next_batch: 0,
            committed_len: header.len() as u64,
            completed: total_batches == 0,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.write_ledger(&ledger)?;
        tracing::info!(
            "📝 Sitemap header written to {} (generation {generation}, {total_batches} batches)",
            self.path.display()
        );
        Ok(ledger)
    }

    /// Append one batch fragment in order. When it is the last outstanding
    /// batch, `trailer()` is appended in the same critical section.
    pub fn append_batch<F>(&self, batch: &Batch, fragment: &str, trailer: F) -> Result<AppendOutcome>
    where
        F: FnOnce() -> String,
    {
        let lock = FileLock::acquire(&self.path, self.lock_timeout)?;

        let Some(mut ledger) = self.read_ledger()? else {
            tracing::warn!(
                "⚠️ Batch {} of {} has no rebuild in progress; dropping",
                batch.index,
                batch.generation
            );
            return Ok(AppendOutcome::Stale);
        };

        if ledger.generation != batch.generation {
            tracing::warn!(
                "⚠️ Batch {} belongs to superseded rebuild {} (current {}); dropping",
                batch.index,
                batch.generation,
                ledger.generation
            );
            return Ok(AppendOutcome::Stale);
        }
        if ledger.completed || batch.index < ledger.next_batch {
            tracing::debug!("Batch {} already written; skipping", batch.index);
            return Ok(AppendOutcome::AlreadyWritten);
        }
        if batch.index > ledger.next_batch {
            return Err(SitemapError::BatchNotReady {
                index: batch.index,
                expected: ledger.next_batch,
            });
        }

        let mut file = &lock.file;
        let on_disk = file.metadata()?.len();
        if on_disk < ledger.committed_len {
            return Err(SitemapError::Ledger(format!(
                "{} is shorter than its committed length ({on_disk} < {})",
                self.path.display(),
                ledger.committed_len
            )));
        }
        // Bytes past the committed length come from an interrupted attempt.
        if on_disk > ledger.committed_len {
            tracing::warn!(
                "⚠️ Sitemap length differs from ledger; truncating to {} bytes",
                ledger.committed_len
            );
            file.set_len(ledger.committed_len)?;
        }
        file.seek(SeekFrom::Start(ledger.committed_len))?;
        file.write_all(fragment.as_bytes())?;

        ledger.next_batch += 1;
        let completed = ledger.next_batch >= ledger.total_batches;
        if completed {
            file.write_all(trailer().as_bytes())?;
        }
        file.flush()?;
        file.sync_data()?;

        ledger.committed_len = file.stream_position()?;
        ledger.completed = completed;
        if completed {
            ledger.finished_at = Some(Utc::now());
        }
        self.write_ledger(&ledger)?;
        drop(lock);

        Ok(AppendOutcome::Appended { completed })
    }

    /// Current ledger, if a rebuild ever started at this path.
    pub fn ledger(&self) -> Result<Option<RebuildLedger>> {
        self.read_ledger()
    }

    fn read_ledger(&self) -> Result<Option<RebuildLedger>> {
        let path = self.ledger_path();
        match std::fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| SitemapError::Ledger(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SitemapError::Io(e)),
        }
    }

    fn write_ledger(&self, ledger: &RebuildLedger) -> Result<()> {
        let path = self.ledger_path();
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let json = serde_json::to_string_pretty(ledger)
            .map_err(|e| SitemapError::Ledger(e.to_string()))?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitemapper_core::ContentId;

    fn batch(generation: &str, index: usize, total: usize) -> Batch {
        Batch {
            generation: generation.into(),
            index,
            total,
            ids: vec![ContentId(index as u64)],
            is_last: index + 1 == total,
        }
    }

    fn appender(dir: &Path) -> SitemapAppender {
        SitemapAppender::new(dir.join("sitemap.xml"), Duration::from_millis(100))
    }

    #[test]
    fn test_begin_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let app = appender(dir.path());
        std::fs::write(app.path(), "old content that is longer than the header").unwrap();

        let ledger = app.begin("g1", 2, "<h>").unwrap();
        assert_eq!(std::fs::read_to_string(app.path()).unwrap(), "<h>");
        assert_eq!(ledger.committed_len, 3);
        assert_eq!(app.ledger().unwrap().unwrap(), ledger);
    }

    #[test]
    fn test_in_order_appends_and_trailer() {
        let dir = tempfile::tempdir().unwrap();
        let app = appender(dir.path());
        app.begin("g1", 2, "<h>").unwrap();

        let first = app.append_batch(&batch("g1", 0, 2), "[a]", || "<t>".into()).unwrap();
        assert_eq!(first, AppendOutcome::Appended { completed: false });
        let second = app.append_batch(&batch("g1", 1, 2), "[b]", || "<t>".into()).unwrap();
        assert_eq!(second, AppendOutcome::Appended { completed: true });

        assert_eq!(std::fs::read_to_string(app.path()).unwrap(), "<h>[a][b]<t>");
        let ledger = app.ledger().unwrap().unwrap();
        assert!(ledger.completed);
        assert!(ledger.finished_at.is_some());
    }

    #[test]
    fn test_out_of_order_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let app = appender(dir.path());
        app.begin("g1", 3, "<h>").unwrap();

        let err = app
            .append_batch(&batch("g1", 2, 3), "[c]", || "<t>".into())
            .unwrap_err();
        assert!(matches!(err, SitemapError::BatchNotReady { index: 2, expected: 0 }));
        assert_eq!(std::fs::read_to_string(app.path()).unwrap(), "<h>");
    }

    #[test]
    fn test_retry_is_noop_and_stale_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let app = appender(dir.path());
        app.begin("g1", 2, "<h>").unwrap();
        app.append_batch(&batch("g1", 0, 2), "[a]", || "<t>".into()).unwrap();

        let again = app.append_batch(&batch("g1", 0, 2), "[a]", || "<t>".into()).unwrap();
        assert_eq!(again, AppendOutcome::AlreadyWritten);
        let stale = app.append_batch(&batch("g0", 1, 2), "[x]", || "<t>".into()).unwrap();
        assert_eq!(stale, AppendOutcome::Stale);

        assert_eq!(std::fs::read_to_string(app.path()).unwrap(), "<h>[a]");
    }

    #[test]
    fn test_interrupted_bytes_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let app = appender(dir.path());
        app.begin("g1", 1, "<h>").unwrap();

        // A previous attempt died after writing part of its fragment.
        let mut f = OpenOptions::new().append(true).open(app.path()).unwrap();
        f.write_all(b"[half").unwrap();
        drop(f);

        app.append_batch(&batch("g1", 0, 1), "[a]", || "<t>".into()).unwrap();
        assert_eq!(std::fs::read_to_string(app.path()).unwrap(), "<h>[a]<t>");
    }

    #[test]
    fn test_lock_contention_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let app = appender(dir.path());
        std::fs::write(app.path(), "previous sitemap").unwrap();

        let holder = File::open(app.path()).unwrap();
        holder.lock().unwrap();

        let err = app.begin("g1", 1, "<h>").unwrap_err();
        assert!(matches!(err, SitemapError::LockContention { .. }));
        assert_eq!(std::fs::read_to_string(app.path()).unwrap(), "previous sitemap");

        holder.unlock().unwrap();
        assert!(app.begin("g1", 1, "<h>").is_ok());
    }

    #[test]
    fn test_append_without_rebuild_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let app = appender(dir.path());
        let outcome = app.append_batch(&batch("g1", 0, 1), "[a]", || "<t>".into()).unwrap();
        assert_eq!(outcome, AppendOutcome::Stale);
    }
}
