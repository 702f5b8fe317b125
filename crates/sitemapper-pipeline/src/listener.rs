//! Publish-event listener: coalesces publish bursts into one rebuild.

use std::sync::Arc;

use sitemapper_core::{PublishEvent, Result, SitemapConfig};
use sitemapper_scheduler::TaskScheduler;

use crate::REBUILD_TASK;

pub struct PublishListener {
    config: Arc<SitemapConfig>,
    scheduler: Arc<dyn TaskScheduler>,
}

impl PublishListener {
    pub fn new(config: Arc<SitemapConfig>, scheduler: Arc<dyn TaskScheduler>) -> Self {
        Self { config, scheduler }
    }

    /// Schedule a rebuild after the coalescing delay unless one is already
    /// pending. Returns whether a task was queued.
    pub fn on_publish(&self, event: &PublishEvent) -> Result<bool> {
        if !event.is_publish() {
            tracing::debug!(
                "Ignoring {} {} → {}: not a publish",
                event.content_type,
                event.id,
                event.new_status
            );
            return Ok(false);
        }
        if !self.config.is_tracked_type(&event.content_type) {
            tracing::debug!("Ignoring publish of untracked type '{}'", event.content_type);
            return Ok(false);
        }

        if self.scheduler.has_pending(REBUILD_TASK)? {
            tracing::debug!(
                "Rebuild already pending; {} {} coalesced",
                event.content_type,
                event.id
            );
            return Ok(false);
        }

        let delay = self.config.coalesce_delay();
        self.scheduler
            .schedule(REBUILD_TASK, serde_json::Value::Null, delay)?;
        tracing::info!(
            "📣 {} {} {}, sitemap rebuild in {}s",
            event.content_type,
            event.id,
            if event.is_republish() { "updated" } else { "published" },
            delay.as_secs()
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitemapper_core::{ContentId, ContentStatus};
    use sitemapper_scheduler::{QueueHandle, RetryPolicy, TaskQueue};
    use std::time::Duration;

    fn listener() -> (PublishListener, QueueHandle) {
        let queue = QueueHandle::new(TaskQueue::new(RetryPolicy::default()));
        let listener = PublishListener::new(
            Arc::new(SitemapConfig::default()),
            Arc::new(queue.clone()),
        );
        (listener, queue)
    }

    #[test]
    fn test_burst_coalesces_into_one_rebuild() {
        let (listener, queue) = listener();
        let mut scheduled = 0;
        for id in 1..=10u64 {
            let ev = PublishEvent::published(ContentId(id), "post", ContentStatus::Draft);
            if listener.on_publish(&ev).unwrap() {
                scheduled += 1;
            }
        }
        assert_eq!(scheduled, 1);
        assert_eq!(queue.lock().unwrap().pending_count(REBUILD_TASK), 1);

        let task = queue.lock().unwrap().list_tasks()[0].clone();
        let delay = task.run_at - task.created_at;
        assert_eq!(delay.num_seconds(), 300);
    }

    #[test]
    fn test_ignores_non_publish_and_untracked() {
        let (listener, queue) = listener();
        let draft = PublishEvent {
            id: ContentId(1),
            content_type: "post".into(),
            previous_status: ContentStatus::Publish,
            new_status: ContentStatus::Draft,
        };
        assert!(!listener.on_publish(&draft).unwrap());

        let attachment = PublishEvent::published(ContentId(2), "attachment", ContentStatus::Draft);
        assert!(!listener.on_publish(&attachment).unwrap());
        assert!(!queue.has_pending(REBUILD_TASK).unwrap());
    }

    #[test]
    fn test_publish_while_rebuild_runs_queues_another() {
        let (listener, queue) = listener();
        let ev = PublishEvent::published(ContentId(1), "page", ContentStatus::Publish);
        assert!(listener.on_publish(&ev).unwrap());

        let later = chrono::Utc::now() + chrono::Duration::from_std(Duration::from_secs(301)).unwrap();
        let claimed = queue.lock().unwrap().take_due(later).unwrap();
        assert_eq!(claimed.len(), 1);

        // The running rebuild may already have enumerated; a new one is needed.
        assert!(listener.on_publish(&ev).unwrap());
        assert!(!listener.on_publish(&ev).unwrap());
        queue.lock().unwrap().complete(&claimed[0].id).unwrap();
        assert_eq!(queue.lock().unwrap().pending_count(REBUILD_TASK), 1);
    }
}
