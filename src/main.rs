//! # Sitemapper: batched sitemap rebuilds driven by publish events
//!
//! Usage:
//!   sitemapper init                                  # Write default config
//!   sitemapper upsert --id 42 --type post --url https://example.com/hello/
//!   sitemapper publish --id 42 --type post           # Queue a coalesced rebuild
//!   sitemapper rebuild --now                         # Rebuild in the foreground
//!   sitemapper worker                                # Run queued tasks until Ctrl-C
//!   sitemapper status                                # Pending tasks + last rebuild

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sitemapper_core::{ContentId, ContentItem, ContentStatus, PublishEvent, SitemapConfig};
use sitemapper_pipeline::{RebuildOutcome, SitemapPipeline, SqliteContentStore};
use sitemapper_scheduler::{QueueHandle, RetryPolicy, SchedulerDb, TaskQueue, spawn_worker};

#[derive(Parser)]
#[command(
    name = "sitemapper",
    version,
    about = "🗺️ Sitemapper: batched, lock-protected sitemap rebuilds"
)]
struct Cli {
    /// Config file (default: ~/.sitemapper/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Record a status transition and queue a rebuild if it is a publish
    Publish {
        #[arg(long)]
        id: u64,
        #[arg(long = "type")]
        content_type: String,
        /// Status before the transition
        #[arg(long, default_value = "draft")]
        previous: String,
    },
    /// Insert or update an item in the content database
    Upsert {
        #[arg(long)]
        id: u64,
        #[arg(long = "type")]
        content_type: String,
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "publish")]
        status: String,
        /// Keep the item out of the sitemap
        #[arg(long)]
        excluded: bool,
    },
    /// Queue a rebuild, or run one immediately with --now
    Rebuild {
        #[arg(long)]
        now: bool,
    },
    /// Run queued tasks until interrupted
    Worker,
    /// Show pending tasks and the last rebuild
    Status,
}

fn load_config(path: Option<&PathBuf>) -> Result<SitemapConfig> {
    let config = match path {
        Some(p) => SitemapConfig::load_from(p)?,
        None => SitemapConfig::load()?,
    };
    Ok(config)
}

fn open_queue(config: &SitemapConfig) -> Result<QueueHandle> {
    let db = SchedulerDb::open(&config.scheduler.db_path())
        .context("Failed to open scheduler database")?;
    let retry = RetryPolicy {
        max_attempts: config.scheduler.max_attempts,
        base_delay_secs: config.scheduler.base_backoff_secs,
        max_delay_secs: config.scheduler.max_backoff_secs,
    };
    Ok(QueueHandle::new(TaskQueue::with_db(db, retry)?))
}

fn open_store(config: &SitemapConfig) -> Result<SqliteContentStore> {
    SqliteContentStore::open(&config.content.db_path()).context("Failed to open content database")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "sitemapper=debug,sitemapper_pipeline=debug,sitemapper_scheduler=debug"
    } else {
        "sitemapper=info,sitemapper_pipeline=info,sitemapper_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    if let Commands::Init { force } = &cli.command {
        let path = cli.config.clone().unwrap_or_else(SitemapConfig::default_path);
        if path.exists() && !force {
            println!("⚠️  Config already exists: {} (use --force to overwrite)", path.display());
            return Ok(());
        }
        SitemapConfig::default().save_to(&path)?;
        println!("✅ Config written to {}", path.display());
        return Ok(());
    }

    let config = load_config(cli.config.as_ref())?;
    let tick = Duration::from_secs(config.scheduler.tick_interval_secs.max(1));
    let coalesce = config.coalesce_delay();
    let store = Arc::new(open_store(&config)?);
    let queue = open_queue(&config)?;
    let pipeline = SitemapPipeline::new(config, store.clone(), queue.clone());

    match cli.command {
        Commands::Init { .. } => {}
        Commands::Publish {
            id,
            content_type,
            previous,
        } => {
            let event = PublishEvent::published(ContentId(id), &content_type, previous.parse()?);
            if !store.set_status(ContentId(id), ContentStatus::Publish)? {
                tracing::warn!("Item {id} is not in the content database");
            }
            if pipeline.publish(&event)? {
                println!("📣 Rebuild queued in {}s", coalesce.as_secs());
            } else {
                println!("⏳ Rebuild already pending (or event ignored)");
            }
        }
        Commands::Upsert {
            id,
            content_type,
            url,
            status,
            excluded,
        } => {
            let item = ContentItem {
                id: ContentId(id),
                content_type,
                url,
                last_modified: Utc::now(),
                excluded,
            };
            let status: ContentStatus = status.parse()?;
            store.upsert(&item, status)?;
            println!("✅ Item {id} saved ({status})");
        }
        Commands::Rebuild { now: false } => match pipeline.schedule_rebuild(Duration::ZERO)? {
            Some(handle) => println!("📅 Rebuild queued as {} (run `sitemapper worker`)", handle.id),
            None => println!("⏳ Rebuild already pending"),
        },
        Commands::Rebuild { now: true } => {
            let report = pipeline.rebuild_now()?;
            match report.outcome {
                RebuildOutcome::Skipped => println!("🗺️ No eligible content; sitemap untouched"),
                RebuildOutcome::Dispatched {
                    generation,
                    items,
                    batches,
                } => {
                    let done = report.ledger.as_ref().is_some_and(|l| l.completed);
                    println!(
                        "{} Rebuild {generation}: {items} items, {batches} batches, {} task runs",
                        if done { "✅" } else { "⚠️" },
                        report.executed
                    );
                    println!("   Output: {}", pipeline.appender().path().display());
                }
            }
        }
        Commands::Worker => {
            let recovered = queue.lock()?.recover_interrupted()?;
            if recovered > 0 {
                println!("♻️ Re-queued {recovered} interrupted task(s)");
            }
            let registry = Arc::new(pipeline.registry());
            tokio::select! {
                _ = spawn_worker(queue, registry, tick) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("🛑 Worker stopping");
                }
            }
        }
        Commands::Status => {
            let mut q = queue.lock()?;
            q.refresh()?;
            println!("📋 Tasks ({} live):", q.list_tasks().len());
            for task in q.list_tasks() {
                println!(
                    "   {} {:<22} {:<9} run_at={} attempts={}",
                    task.id,
                    task.name,
                    task.status.as_str(),
                    task.run_at.format("%Y-%m-%d %H:%M:%S"),
                    task.attempts
                );
            }
            match pipeline.appender().ledger()? {
                Some(ledger) => println!("🗺️ Last rebuild:\n{}", serde_json::to_string_pretty(&ledger)?),
                None => println!("🗺️ No rebuild has run yet"),
            }
        }
    }

    Ok(())
}
