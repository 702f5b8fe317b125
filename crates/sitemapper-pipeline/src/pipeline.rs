//! Wiring: one struct that owns the shared pieces and hands out the
//! coordinator, batch writer, listener and handler registry.

use std::sync::Arc;
use std::time::Duration;

use sitemapper_core::{PublishEvent, Result, SitemapConfig};
use sitemapper_scheduler::{HandlerRegistry, QueueHandle, TaskHandle, TaskScheduler, drain};

use crate::appender::{RebuildLedger, SitemapAppender};
use crate::content::ContentStore;
use crate::coordinator::{Coordinator, RebuildOutcome};
use crate::listener::PublishListener;
use crate::writer::BatchWriter;
use crate::{BATCH_TASK, REBUILD_TASK};

/// Outcome of [`SitemapPipeline::rebuild_now`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    pub outcome: RebuildOutcome,
    /// Task executions performed while draining the queue.
    pub executed: usize,
    /// Ledger after draining (`None` if no rebuild ever started).
    pub ledger: Option<RebuildLedger>,
}

pub struct SitemapPipeline {
    config: Arc<SitemapConfig>,
    store: Arc<dyn ContentStore>,
    appender: Arc<SitemapAppender>,
    queue: QueueHandle,
}

impl SitemapPipeline {
    pub fn new(config: SitemapConfig, store: Arc<dyn ContentStore>, queue: QueueHandle) -> Self {
        let appender = SitemapAppender::new(config.output_path(), config.lock_timeout());
        Self {
            config: Arc::new(config),
            store,
            appender: Arc::new(appender),
            queue,
        }
    }

    pub fn config(&self) -> &SitemapConfig {
        &self.config
    }

    pub fn appender(&self) -> &SitemapAppender {
        &self.appender
    }

    pub fn queue(&self) -> &QueueHandle {
        &self.queue
    }

    fn scheduler(&self) -> Arc<dyn TaskScheduler> {
        Arc::new(self.queue.clone())
    }

    pub fn coordinator(&self) -> Coordinator {
        Coordinator::new(
            Arc::clone(&self.config),
            Arc::clone(&self.store),
            Arc::clone(&self.appender),
            self.scheduler(),
        )
    }

    pub fn batch_writer(&self) -> BatchWriter {
        BatchWriter::new(
            Arc::clone(&self.config),
            Arc::clone(&self.store),
            Arc::clone(&self.appender),
        )
    }

    pub fn listener(&self) -> PublishListener {
        PublishListener::new(Arc::clone(&self.config), self.scheduler())
    }

    /// Handlers for both task names, ready for `spawn_worker`.
    pub fn registry(&self) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register(REBUILD_TASK, Arc::new(self.coordinator()));
        registry.register(BATCH_TASK, Arc::new(self.batch_writer()));
        registry
    }

    /// Feed a publish event to the listener.
    pub fn publish(&self, event: &PublishEvent) -> Result<bool> {
        self.listener().on_publish(event)
    }

    /// Queue a rebuild with `delay`, unless one is already pending.
    pub fn schedule_rebuild(&self, delay: Duration) -> Result<Option<TaskHandle>> {
        let scheduler = self.scheduler();
        if scheduler.has_pending(REBUILD_TASK)? {
            return Ok(None);
        }
        scheduler
            .schedule(REBUILD_TASK, serde_json::Value::Null, delay)
            .map(Some)
    }

    /// Run the coordinator immediately, then drain the queue without waiting
    /// for task delays.
    pub fn rebuild_now(&self) -> Result<RebuildReport> {
        let outcome = self.coordinator().run()?;
        let rounds = match &outcome {
            RebuildOutcome::Dispatched { batches, .. } => {
                (batches + 1) * self.config.scheduler.max_attempts.max(1) as usize + 1
            }
            RebuildOutcome::Skipped => 1,
        };
        let executed = drain(&self.queue, &self.registry(), rounds)?;
        Ok(RebuildReport {
            outcome,
            executed,
            ledger: self.appender.ledger()?,
        })
    }
}
