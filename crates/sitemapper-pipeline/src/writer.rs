//! Batch writer: renders one batch and appends it to the sitemap.

use std::sync::Arc;

use chrono::Utc;
use sitemapper_core::{Batch, Result, SitemapConfig};
use sitemapper_scheduler::{Task, TaskHandler};

use crate::appender::{AppendOutcome, SitemapAppender};
use crate::content::ContentStore;
use crate::render;

/// What one batch contributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub outcome: AppendOutcome,
    /// `<url>` entries rendered from content (excludes the auxiliary entry).
    pub entries: usize,
    /// Identifiers skipped as excluded or missing.
    pub skipped: usize,
}

pub struct BatchWriter {
    config: Arc<SitemapConfig>,
    store: Arc<dyn ContentStore>,
    appender: Arc<SitemapAppender>,
}

impl BatchWriter {
    pub fn new(
        config: Arc<SitemapConfig>,
        store: Arc<dyn ContentStore>,
        appender: Arc<SitemapAppender>,
    ) -> Self {
        Self {
            config,
            store,
            appender,
        }
    }

    /// Render the batch's items and append them. Errors propagate so the
    /// queue can retry; a retry of a committed batch is a no-op.
    pub fn write(&self, batch: &Batch) -> Result<BatchReport> {
        if batch.is_empty() {
            tracing::warn!("⚠️ Batch {}/{} carries no identifiers", batch.index + 1, batch.total);
        }
        let mut fragment = String::new();
        let mut entries = 0;
        let mut skipped = 0;

        for id in &batch.ids {
            match self.store.get_item(*id)? {
                Some(item) if item.excluded => {
                    tracing::debug!("Skipping excluded item {id}");
                    skipped += 1;
                }
                Some(item) => {
                    fragment.push_str(&render::item_entry(&self.config, &item));
                    entries += 1;
                }
                None => {
                    tracing::debug!("Item {id} no longer exists; skipping");
                    skipped += 1;
                }
            }
        }

        let config = &self.config;
        let outcome = self
            .appender
            .append_batch(batch, &fragment, || {
                render::trailer(config, Utc::now().date_naive())
            })
            .inspect_err(|e| {
                tracing::warn!("⚠️ Batch {}/{} write failed: {e}", batch.index + 1, batch.total)
            })?;

        match outcome {
            AppendOutcome::Appended { completed } => {
                if completed != batch.is_last {
                    tracing::warn!(
                        "⚠️ Batch {} completion ({completed}) disagrees with its is_last flag",
                        batch.index
                    );
                }
                tracing::info!(
                    "🧩 Batch {}/{} appended: {entries} of {} entries, {skipped} skipped",
                    batch.index + 1,
                    batch.total,
                    batch.len()
                );
                if completed {
                    tracing::info!(
                        "✅ Sitemap rebuild {} complete: {}",
                        batch.generation,
                        self.appender.path().display()
                    );
                }
            }
            AppendOutcome::AlreadyWritten | AppendOutcome::Stale => {}
        }

        Ok(BatchReport {
            outcome,
            entries,
            skipped,
        })
    }
}

impl TaskHandler for BatchWriter {
    fn handle(&self, task: &Task) -> Result<()> {
        let batch: Batch = serde_json::from_value(task.payload.clone())?;
        self.write(&batch).map(|_| ())
    }
}
