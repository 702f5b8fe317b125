//! # Sitemapper Core
//!
//! Shared building blocks for the sitemap rebuild pipeline:
//! - [`config`]: TOML configuration (`~/.sitemapper/config.toml`)
//! - [`error`]: the [`SitemapError`] type used by every library crate
//! - [`types`]: content identifiers, items, statuses and batches

pub mod config;
pub mod error;
pub mod types;

pub use config::{AuxiliaryConfig, ContentTypeConfig, SchedulerConfig, SitemapConfig};
pub use error::{Result, SitemapError};
pub use types::{Batch, ContentId, ContentItem, ContentStatus, PublishEvent};
