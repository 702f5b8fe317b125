//! # Sitemapper Pipeline
//!
//! Rebuilds one large sitemap file in ordered batches:
//!
//! ```text
//! publish event ─► PublishListener ─► "sitemap.rebuild" (+300s, deduplicated)
//!                                          │
//!                                     Coordinator
//!                    enumerate ids ─► header (lock) ─► N × "sitemap.write_batch"
//!                                                          (+0s, +5s, +10s, …)
//!                                                               │
//!                                                          BatchWriter
//!                              render <url> entries ─► append in order (lock + ledger)
//!                                                     last batch ─► auxiliary entry + </urlset>
//! ```
//!
//! All file access goes through [`SitemapAppender`]; ordering and completion
//! are enforced by its ledger, not by task delays.

pub mod appender;
pub mod content;
pub mod coordinator;
pub mod listener;
pub mod pipeline;
pub mod render;
pub mod writer;

/// Task name of the coordinator.
pub const REBUILD_TASK: &str = "sitemap.rebuild";
/// Task name of a batch writer.
pub const BATCH_TASK: &str = "sitemap.write_batch";

pub use appender::{AppendOutcome, RebuildLedger, SitemapAppender};
pub use content::{ContentStore, MemoryContentStore, SqliteContentStore};
pub use coordinator::{Coordinator, RebuildOutcome};
pub use listener::PublishListener;
pub use pipeline::{RebuildReport, SitemapPipeline};
pub use writer::{BatchReport, BatchWriter};
