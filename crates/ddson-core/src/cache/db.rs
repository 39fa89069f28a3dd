//! SQLite index for cached downloads.
//!
//! Connection, migration, and row CRUD. Blob-directory handling and the
//! replace/cleanup policies live in the parent module.

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// One indexed blob. `filename` is the opaque name inside the blob
/// directory; callers never choose it.
#[derive(Debug, Clone)]
pub struct CachedFile {
    pub id: i64,
    pub original_url: String,
    pub size: i64,
    pub sha256: String,
    pub filename: String,
    pub last_used: i64,
    pub created: i64,
}

#[derive(Clone)]
pub(super) struct CacheIndex {
    pool: Pool<Sqlite>,
}

/// Percent-encode a path for a sqlite:// URI so spaces and special
/// characters don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

fn row_to_file(row: &sqlx::sqlite::SqliteRow) -> CachedFile {
    CachedFile {
        id: row.get("id"),
        original_url: row.get("original_url"),
        size: row.get("size"),
        sha256: row.get("sha256"),
        filename: row.get("filename"),
        last_used: row.get("last_used"),
        created: row.get("created"),
    }
}

impl CacheIndex {
    /// Open (or create) the index database at `path` and run migrations.
    pub(super) async fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&uri)
            .await?;
        let index = CacheIndex { pool };
        index.migrate().await?;
        Ok(index)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS downloaded_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                original_url TEXT NOT NULL UNIQUE,
                size INTEGER NOT NULL,
                sha256 TEXT NOT NULL,
                filename TEXT NOT NULL,
                last_used INTEGER NOT NULL,
                created INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub(super) async fn get_by_url(&self, url: &str) -> Result<Option<CachedFile>> {
        let row = sqlx::query(
            r#"
            SELECT id, original_url, size, sha256, filename, last_used, created
            FROM downloaded_files
            WHERE original_url = ?1
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_file))
    }

    pub(super) async fn insert(
        &self,
        url: &str,
        size: i64,
        sha256: &str,
        filename: &str,
    ) -> Result<i64> {
        let now = unix_timestamp();
        let id = sqlx::query(
            r#"
            INSERT INTO downloaded_files (original_url, size, sha256, filename, last_used, created)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(url)
        .bind(size)
        .bind(sha256)
        .bind(filename)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    /// Bump `last_used` to now.
    pub(super) async fn touch(&self, id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE downloaded_files
            SET last_used = ?1
            WHERE id = ?2
            "#,
        )
        .bind(unix_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub(super) async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM downloaded_files
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All rows, least-recently-used first. Cleanup walks this order.
    pub(super) async fn list_by_last_used(&self) -> Result<Vec<CachedFile>> {
        let rows = sqlx::query(
            r#"
            SELECT id, original_url, size, sha256, filename, last_used, created
            FROM downloaded_files
            ORDER BY last_used ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_file).collect())
    }
}

#[cfg(test)]
impl CacheIndex {
    pub(super) async fn set_last_used(&self, url: &str, last_used: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE downloaded_files
            SET last_used = ?1
            WHERE original_url = ?2
            "#,
        )
        .bind(last_used)
        .bind(url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Current time as Unix seconds (index timestamps).
pub(super) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
