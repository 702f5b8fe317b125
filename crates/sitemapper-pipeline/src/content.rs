//! Content store access: the identifiers eligible for the sitemap and the
//! full item behind each identifier.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use sitemapper_core::{ContentId, ContentItem, ContentStatus, Result, SitemapError};

/// Read side of the content store as the pipeline consumes it.
pub trait ContentStore: Send + Sync {
    /// Identifiers of the given types in any of the given statuses, ascending.
    fn list_identifiers(&self, types: &[String], statuses: &[ContentStatus]) -> Result<Vec<ContentId>>;

    /// Full item, or `None` if it vanished since enumeration.
    fn get_item(&self, id: ContentId) -> Result<Option<ContentItem>>;
}

fn store_err(e: impl std::fmt::Display) -> SitemapError {
    SitemapError::ContentStore(e.to_string())
}

/// In-memory store, ordered by identifier.
#[derive(Default)]
pub struct MemoryContentStore {
    items: RwLock<BTreeMap<ContentId, (ContentItem, ContentStatus)>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, item: ContentItem, status: ContentStatus) -> Result<()> {
        let mut items = self.items.write().map_err(store_err)?;
        items.insert(item.id, (item, status));
        Ok(())
    }

    pub fn set_status(&self, id: ContentId, status: ContentStatus) -> Result<bool> {
        let mut items = self.items.write().map_err(store_err)?;
        Ok(match items.get_mut(&id) {
            Some(entry) => {
                entry.1 = status;
                true
            }
            None => false,
        })
    }
}

impl ContentStore for MemoryContentStore {
    fn list_identifiers(&self, types: &[String], statuses: &[ContentStatus]) -> Result<Vec<ContentId>> {
        let items = self.items.read().map_err(store_err)?;
        Ok(items
            .values()
            .filter(|(item, status)| types.contains(&item.content_type) && statuses.contains(status))
            .map(|(item, _)| item.id)
            .collect())
    }

    fn get_item(&self, id: ContentId) -> Result<Option<ContentItem>> {
        let items = self.items.read().map_err(store_err)?;
        Ok(items.get(&id).map(|(item, _)| item.clone()))
    }
}

/// SQLite-backed content store (`content_items` table).
pub struct SqliteContentStore {
    conn: Mutex<Connection>,
}

impl SqliteContentStore {
    /// Open or create the content database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(store_err)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(store_err)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS content_items (
                id INTEGER PRIMARY KEY,
                content_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'draft',
                url TEXT NOT NULL,
                last_modified TEXT NOT NULL,
                excluded INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_content_items_type_status
                ON content_items (content_type, status);",
        )
        .map_err(store_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(store_err)
    }

    /// Insert or replace an item with its status.
    pub fn upsert(&self, item: &ContentItem, status: ContentStatus) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO content_items
                 (id, content_type, status, url, last_modified, excluded)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    item.id.0 as i64,
                    item.content_type,
                    status.as_str(),
                    item.url,
                    item.last_modified.to_rfc3339(),
                    item.excluded as i32,
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    /// Change an item's status. Returns false if the item does not exist.
    pub fn set_status(&self, id: ContentId, status: ContentStatus) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE content_items SET status = ?1 WHERE id = ?2",
                rusqlite::params![status.as_str(), id.0 as i64],
            )
            .map_err(store_err)?;
        Ok(changed > 0)
    }
}

impl ContentStore for SqliteContentStore {
    fn list_identifiers(&self, types: &[String], statuses: &[ContentStatus]) -> Result<Vec<ContentId>> {
        if types.is_empty() || statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = |n: usize| vec!["?"; n].join(", ");
        let sql = format!(
            "SELECT id FROM content_items
             WHERE content_type IN ({}) AND status IN ({})
             ORDER BY id ASC",
            placeholders(types.len()),
            placeholders(statuses.len())
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).map_err(store_err)?;
        let params = types
            .iter()
            .map(String::as_str)
            .chain(statuses.iter().map(|s| -> &str { s.as_str() }));
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params), |row| row.get::<_, i64>(0))
            .map_err(store_err)?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(ContentId(row.map_err(store_err)? as u64));
        }
        Ok(ids)
    }

    fn get_item(&self, id: ContentId) -> Result<Option<ContentItem>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT content_type, url, last_modified, excluded
                 FROM content_items WHERE id = ?1",
            )
            .map_err(store_err)?;
        let mut rows = stmt.query([id.0 as i64]).map_err(store_err)?;
        let Some(row) = rows.next().map_err(store_err)? else {
            return Ok(None);
        };

        let content_type: String = row.get(0).map_err(store_err)?;
        let url: String = row.get(1).map_err(store_err)?;
        let last_modified: String = row.get(2).map_err(store_err)?;
        let excluded: i32 = row.get(3).map_err(store_err)?;

        let last_modified = DateTime::parse_from_rfc3339(&last_modified)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| store_err(format!("item {id}: bad last_modified: {e}")))?;

        Ok(Some(ContentItem {
            id,
            content_type,
            url,
            last_modified,
            excluded: excluded != 0,
        }))
    }
}
