//! Data model: what the pipeline reads from the content store and what it
//! ships between tasks.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SitemapError;

/// Opaque key of one publishable item, issued by the content store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(pub u64);

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ContentId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Lifecycle status of a content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    Draft,
    Pending,
    Private,
    Future,
    Publish,
    Trash,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Draft => "draft",
            ContentStatus::Pending => "pending",
            ContentStatus::Private => "private",
            ContentStatus::Future => "future",
            ContentStatus::Publish => "publish",
            ContentStatus::Trash => "trash",
        }
    }
}

impl fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentStatus {
    type Err = SitemapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(ContentStatus::Draft),
            "pending" => Ok(ContentStatus::Pending),
            "private" => Ok(ContentStatus::Private),
            "future" => Ok(ContentStatus::Future),
            "publish" | "published" => Ok(ContentStatus::Publish),
            "trash" => Ok(ContentStatus::Trash),
            other => Err(SitemapError::Config(format!("unknown content status '{other}'"))),
        }
    }
}

/// One item as the batch writer sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ContentId,
    /// Content type name ("page", "post", ...), used for the default priority.
    pub content_type: String,
    /// Canonical absolute URL.
    pub url: String,
    pub last_modified: DateTime<Utc>,
    /// Flagged "noindex"; never listed in the sitemap.
    #[serde(default)]
    pub excluded: bool,
}

/// A content item changed status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishEvent {
    pub id: ContentId,
    pub content_type: String,
    pub previous_status: ContentStatus,
    pub new_status: ContentStatus,
}

impl PublishEvent {
    /// Event for a fresh publish of a previously unpublished item.
    pub fn published(id: ContentId, content_type: &str, previous: ContentStatus) -> Self {
        Self {
            id,
            content_type: content_type.to_string(),
            previous_status: previous,
            new_status: ContentStatus::Publish,
        }
    }

    /// True when the item ends up published.
    pub fn is_publish(&self) -> bool {
        self.new_status == ContentStatus::Publish
    }

    /// True when the item was already published before (an update).
    pub fn is_republish(&self) -> bool {
        self.is_publish() && self.previous_status == ContentStatus::Publish
    }
}

/// An ordered, immutable slice of identifiers handed to one batch task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Rebuild this batch belongs to.
    pub generation: String,
    /// 0-based position within the rebuild.
    pub index: usize,
    /// Number of batches dispatched for the rebuild.
    pub total: usize,
    pub ids: Vec<ContentId>,
    pub is_last: bool,
}

impl Batch {
    /// Split `ids` into batches of `size`. Only the final batch is `is_last`.
    pub fn partition(generation: &str, ids: &[ContentId], size: usize) -> Vec<Batch> {
        if ids.is_empty() || size == 0 {
            return Vec::new();
        }
        let total = ids.len().div_ceil(size);
        ids.chunks(size)
            .enumerate()
            .map(|(index, chunk)| Batch {
                generation: generation.to_string(),
                index,
                total,
                ids: chunk.to_vec(),
                is_last: index + 1 == total,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
