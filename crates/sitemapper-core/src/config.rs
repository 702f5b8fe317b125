//! Sitemapper configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SitemapError};
use crate::types::ContentStatus;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SitemapConfig {
    /// Site root URL, e.g. `https://example.com/`.
    #[serde(default = "default_site_url")]
    pub site_url: String,
    /// Where the sitemap is written.
    #[serde(default = "default_output_path")]
    pub output_path: String,
    /// Identifiers per batch task.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Delay added per batch index when fanning out.
    #[serde(default = "default_batch_spacing_secs")]
    pub batch_spacing_secs: u64,
    /// Publish bursts within this window collapse into one rebuild.
    #[serde(default = "default_coalesce_delay_secs")]
    pub coalesce_delay_secs: u64,
    /// How long to wait for the sitemap lock before giving up.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default = "default_change_freq")]
    pub change_freq: String,
    /// URLs containing any of these get the top priority.
    #[serde(default = "default_priority_paths")]
    pub priority_paths: Vec<String>,
    #[serde(default = "default_eligible_statuses")]
    pub eligible_statuses: Vec<ContentStatus>,
    #[serde(default = "default_content_types")]
    pub content_types: Vec<ContentTypeConfig>,
    #[serde(default)]
    pub auxiliary: AuxiliaryConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub content: ContentConfig,
}

fn default_site_url() -> String { "https://example.com/".into() }
fn default_output_path() -> String { "~/.sitemapper/sitemap.xml".into() }
fn default_batch_size() -> usize { 200 }
fn default_batch_spacing_secs() -> u64 { 5 }
fn default_coalesce_delay_secs() -> u64 { 300 }
fn default_lock_timeout_ms() -> u64 { 2_000 }
fn default_change_freq() -> String { "daily".into() }
fn default_priority_paths() -> Vec<String> { vec!["/services/".into()] }
fn default_eligible_statuses() -> Vec<ContentStatus> { vec![ContentStatus::Publish] }
fn default_content_types() -> Vec<ContentTypeConfig> {
    vec![
        ContentTypeConfig { name: "page".into(), priority: "0.9".into() },
        ContentTypeConfig { name: "post".into(), priority: "0.7".into() },
        ContentTypeConfig { name: "service".into(), priority: "0.9".into() },
    ]
}

impl Default for SitemapConfig {
    fn default() -> Self {
        Self {
            site_url: default_site_url(),
            output_path: default_output_path(),
            batch_size: default_batch_size(),
            batch_spacing_secs: default_batch_spacing_secs(),
            coalesce_delay_secs: default_coalesce_delay_secs(),
            lock_timeout_ms: default_lock_timeout_ms(),
            change_freq: default_change_freq(),
            priority_paths: default_priority_paths(),
            eligible_statuses: default_eligible_statuses(),
            content_types: default_content_types(),
            auxiliary: AuxiliaryConfig::default(),
            scheduler: SchedulerConfig::default(),
            content: ContentConfig::default(),
        }
    }
}

impl SitemapConfig {
    /// Load config from the default path (~/.sitemapper/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::debug!("No config at {}; using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SitemapError::Config(format!("Failed to read config: {e}")))?;
        tracing::debug!("Loading config from {}", path.display());
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| SitemapError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the given path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| SitemapError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the sitemapper home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sitemapper")
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SitemapError::Config("batch_size must be greater than 0".into()));
        }
        if self.content_types.is_empty() {
            return Err(SitemapError::Config("at least one content type is required".into()));
        }
        if self.eligible_statuses.is_empty() {
            return Err(SitemapError::Config("eligible_statuses must not be empty".into()));
        }
        for ct in &self.content_types {
            check_priority(&format!("content_types.{}", ct.name), &ct.priority)?;
        }
        check_priority("auxiliary", &self.auxiliary.priority)?;
        Ok(())
    }

    /// Expanded sitemap path.
    pub fn output_path(&self) -> PathBuf {
        expand_path(&self.output_path)
    }

    pub fn batch_spacing(&self) -> Duration {
        Duration::from_secs(self.batch_spacing_secs)
    }

    pub fn coalesce_delay(&self) -> Duration {
        Duration::from_secs(self.coalesce_delay_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Names of the content types that go into the sitemap.
    pub fn type_names(&self) -> Vec<String> {
        self.content_types.iter().map(|c| c.name.clone()).collect()
    }

    /// Configured default priority for a content type.
    pub fn type_priority(&self, content_type: &str) -> Option<&str> {
        self.content_types
            .iter()
            .find(|c| c.name == content_type)
            .map(|c| c.priority.as_str())
    }

    pub fn is_tracked_type(&self, content_type: &str) -> bool {
        self.content_types.iter().any(|c| c.name == content_type)
    }
}

fn check_priority(what: &str, value: &str) -> Result<()> {
    match value.parse::<f32>() {
        Ok(p) if (0.0..=1.0).contains(&p) => Ok(()),
        _ => Err(SitemapError::Config(format!(
            "{what}: priority '{value}' must be a number between 0.0 and 1.0"
        ))),
    }
}

/// Expand a leading `~` in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

/// One content type included in the sitemap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentTypeConfig {
    pub name: String,
    /// Default `<priority>` for items of this type.
    #[serde(default = "default_type_priority")]
    pub priority: String,
}

fn default_type_priority() -> String { "0.9".into() }

/// The synthetic entry appended after the last batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuxiliaryConfig {
    /// Path relative to `site_url`.
    #[serde(default = "default_aux_path")]
    pub path: String,
    #[serde(default = "default_aux_priority")]
    pub priority: String,
}

fn default_aux_path() -> String { "llms.txt".into() }
fn default_aux_priority() -> String { "1.0".into() }

impl Default for AuxiliaryConfig {
    fn default() -> Self {
        Self {
            path: default_aux_path(),
            priority: default_aux_priority(),
        }
    }
}

/// Task queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_db")]
    pub db_path: String,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_secs")]
    pub base_backoff_secs: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

fn default_scheduler_db() -> String { "~/.sitemapper/scheduler.db".into() }
fn default_tick_interval_secs() -> u64 { 1 }
fn default_max_attempts() -> u32 { 5 }
fn default_base_backoff_secs() -> u64 { 5 }
fn default_max_backoff_secs() -> u64 { 300 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            db_path: default_scheduler_db(),
            tick_interval_secs: default_tick_interval_secs(),
            max_attempts: default_max_attempts(),
            base_backoff_secs: default_base_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn db_path(&self) -> PathBuf {
        expand_path(&self.db_path)
    }
}

/// Content store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    #[serde(default = "default_content_db")]
    pub db_path: String,
}

fn default_content_db() -> String { "~/.sitemapper/content.db".into() }

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            db_path: default_content_db(),
        }
    }
}

impl ContentConfig {
    pub fn db_path(&self) -> PathBuf {
        expand_path(&self.db_path)
    }
}
