//! Coordinator: starts a rebuild and fans it out into batch tasks.

use std::sync::Arc;

use chrono::Utc;
use sitemapper_core::{Batch, Result, SitemapConfig};
use sitemapper_scheduler::{Task, TaskHandler, TaskScheduler};

use crate::appender::SitemapAppender;
use crate::content::ContentStore;
use crate::render;
use crate::BATCH_TASK;

/// Result of one coordinator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// Nothing eligible; the existing file was left alone.
    Skipped,
    /// Header written and `batches` batch tasks queued.
    Dispatched {
        generation: String,
        items: usize,
        batches: usize,
    },
}

pub struct Coordinator {
    config: Arc<SitemapConfig>,
    store: Arc<dyn ContentStore>,
    appender: Arc<SitemapAppender>,
    scheduler: Arc<dyn TaskScheduler>,
}

impl Coordinator {
    pub fn new(
        config: Arc<SitemapConfig>,
        store: Arc<dyn ContentStore>,
        appender: Arc<SitemapAppender>,
        scheduler: Arc<dyn TaskScheduler>,
    ) -> Self {
        Self {
            config,
            store,
            appender,
            scheduler,
        }
    }

    /// Enumerate, write the header, queue one task per batch.
    ///
    /// Errors before the header write leave the file untouched; a header
    /// failure means no batch is ever queued.
    pub fn run(&self) -> Result<RebuildOutcome> {
        let mut ids = self
            .store
            .list_identifiers(&self.config.type_names(), &self.config.eligible_statuses)
            .inspect_err(|e| tracing::error!("❌ Sitemap rebuild aborted, enumeration failed: {e}"))?;
        ids.sort_unstable();
        ids.dedup();

        if ids.is_empty() {
            tracing::info!("🗺️ No eligible content; sitemap left untouched");
            return Ok(RebuildOutcome::Skipped);
        }

        let generation = new_generation();
        let batches = Batch::partition(&generation, &ids, self.config.batch_size);

        self.appender
            .begin(&generation, batches.len(), render::HEADER)
            .inspect_err(|e| tracing::error!("❌ Sitemap rebuild aborted, header write failed: {e}"))?;

        let spacing = self.config.batch_spacing();
        let total = batches.len();
        for batch in batches {
            let delay = spacing * batch.index as u32;
            let payload = serde_json::to_value(&batch)?;
            self.scheduler.schedule(BATCH_TASK, payload, delay)?;
        }

        tracing::info!(
            "🗺️ Sitemap rebuild {generation}: {} items in {total} batches of up to {}",
            ids.len(),
            self.config.batch_size
        );
        Ok(RebuildOutcome::Dispatched {
            generation,
            items: ids.len(),
            batches: total,
        })
    }
}

impl TaskHandler for Coordinator {
    fn handle(&self, _task: &Task) -> Result<()> {
        self.run().map(|_| ())
    }
}

/// Sortable, unique rebuild id.
fn new_generation() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%S"), &id[..8])
}
