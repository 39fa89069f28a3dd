//! URL-keyed cache of verified download artifacts.
//!
//! A SQLite index (`downloaded_files`) maps the original URL to an opaque
//! blob inside `<workspace>/downloaded_files/`. One internal lock serializes
//! mutation so index and blob directory cannot drift under concurrency; a
//! stale row whose blob is gone is simply treated as a miss.

mod db;

pub use db::CachedFile;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

use self::db::{unix_timestamp, CacheIndex};

const BLOB_DIR: &str = "downloaded_files";
const INDEX_FILE: &str = "downloaded_files.db";

pub struct CacheStore {
    index: CacheIndex,
    blob_dir: PathBuf,
    lock: Mutex<()>,
}

impl CacheStore {
    /// Open the cache under `workspace`, creating the blob directory and
    /// index database as needed.
    pub async fn open(workspace: &Path) -> Result<Self> {
        let blob_dir = workspace.join(BLOB_DIR);
        tokio::fs::create_dir_all(&blob_dir)
            .await
            .with_context(|| format!("create blob dir {}", blob_dir.display()))?;
        let index = CacheIndex::open_at(&workspace.join(INDEX_FILE)).await?;
        Ok(CacheStore {
            index,
            blob_dir,
            lock: Mutex::new(()),
        })
    }

    /// Look up `url`. Returns the blob path when a row exists, the stored
    /// checksum matches the requested one (if any), and the blob is on disk
    /// with the recorded length. Bumps `last_used` on a hit.
    pub async fn get(&self, url: &str, checksum: Option<&str>) -> Result<Option<PathBuf>> {
        let _guard = self.lock.lock().await;

        let Some(row) = self.index.get_by_url(url).await? else {
            return Ok(None);
        };
        if let Some(want) = checksum {
            if !row.sha256.eq_ignore_ascii_case(want) {
                tracing::debug!(url, "cache row exists but checksum differs, miss");
                return Ok(None);
            }
        }

        let path = self.blob_dir.join(&row.filename);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.len() as i64 == row.size => {
                self.index.touch(row.id).await?;
                Ok(Some(path))
            }
            Ok(meta) => {
                tracing::warn!(
                    url,
                    got = meta.len(),
                    want = row.size,
                    "cached blob has wrong length, treating as miss"
                );
                Ok(None)
            }
            Err(_) => {
                tracing::warn!(url, blob = %path.display(), "cached blob missing, treating as miss");
                Ok(None)
            }
        }
    }

    /// Insert or refresh the artifact for `url`. When no row exists, or the
    /// existing row differs in checksum (when one is provided) or size, the
    /// old row and blob are replaced by a copy of `source` under a fresh
    /// opaque name. Otherwise only `last_used` is bumped.
    pub async fn add(&self, url: &str, source: &Path, checksum: &str) -> Result<()> {
        let _guard = self.lock.lock().await;

        let source_size = tokio::fs::metadata(source)
            .await
            .with_context(|| format!("stat {}", source.display()))?
            .len() as i64;

        let existing = self.index.get_by_url(url).await?;
        if let Some(row) = &existing {
            let checksum_differs = !checksum.is_empty() && !row.sha256.eq_ignore_ascii_case(checksum);
            if !checksum_differs && row.size == source_size {
                self.index.touch(row.id).await?;
                return Ok(());
            }
            self.remove_row_and_blob(row).await?;
        }

        let filename = self.store_blob(source).await?;
        self.index
            .insert(url, source_size, checksum, &filename)
            .await?;
        tracing::info!(url, filename, size = source_size, "cached new artifact");
        Ok(())
    }

    /// Evict cache entries, least-recently-used first.
    ///
    /// Phase 1: while the summed blob size exceeds `max_size`, delete the
    /// oldest row. Phase 2: while it still exceeds `tolerance_size` and the
    /// oldest row has been idle longer than `max_life`, delete it; stop at
    /// the first row within `max_life`.
    pub async fn cleanup(
        &self,
        max_life: Duration,
        tolerance_size: u64,
        max_size: u64,
    ) -> Result<()> {
        let _guard = self.lock.lock().await;

        let rows = self.index.list_by_last_used().await?;
        let mut sizes = Vec::with_capacity(rows.len());
        let mut total: u64 = 0;
        for row in &rows {
            let len = match tokio::fs::metadata(self.blob_dir.join(&row.filename)).await {
                Ok(meta) => meta.len(),
                Err(_) => 0,
            };
            sizes.push(len);
            total += len;
        }

        let now = unix_timestamp();
        let mut evicted = 0usize;
        for (row, len) in rows.iter().zip(sizes.iter().copied()) {
            let over_hard_cap = total > max_size;
            let over_tolerance = total > tolerance_size;
            let idle_too_long = now.saturating_sub(row.last_used) as u64 > max_life.as_secs();

            if over_hard_cap || (over_tolerance && idle_too_long) {
                self.remove_row_and_blob(row).await?;
                total = total.saturating_sub(len);
                evicted += 1;
                continue;
            }
            // Rows are in ascending last_used order: once the oldest
            // surviving row is neither over the cap nor stale, nothing
            // younger can be evictable either.
            break;
        }

        if evicted > 0 {
            tracing::info!(evicted, remaining_bytes = total, "cache cleanup done");
        }
        Ok(())
    }

    async fn remove_row_and_blob(&self, row: &CachedFile) -> Result<()> {
        let path = self.blob_dir.join(&row.filename);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!(blob = %path.display(), error = %e, "could not remove blob");
        }
        self.index.delete(row.id).await?;
        Ok(())
    }

    /// Copy `source` into the blob directory under a fresh opaque name and
    /// return that name. The destination is created exclusively with its
    /// final name, so a concurrent reader never sees a half-written blob
    /// under a name the index already points at.
    async fn store_blob(&self, source: &Path) -> Result<String> {
        let dest = tempfile::Builder::new()
            .prefix("file-")
            .rand_bytes(12)
            .tempfile_in(&self.blob_dir)
            .context("create blob file")?;
        let dest_path = dest.path().to_path_buf();
        tokio::fs::copy(source, &dest_path)
            .await
            .with_context(|| format!("copy {} into cache", source.display()))?;
        let (_file, kept_path) = dest.keep().context("persist blob file")?;
        let filename = kept_path
            .file_name()
            .and_then(|n| n.to_str())
            .context("blob filename not utf-8")?
            .to_string();
        Ok(filename)
    }

    #[cfg(test)]
    pub(crate) async fn backdate(&self, url: &str, last_used: i64) -> Result<()> {
        self.index.set_last_used(url, last_used).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn store() -> (tempfile::TempDir, CacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    fn source_file(dir: &Path, content: &[u8]) -> PathBuf {
        let path = dir.join("source.bin");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content).unwrap();
        path
    }

    fn blob_count(workspace: &Path) -> usize {
        std::fs::read_dir(workspace.join(BLOB_DIR)).unwrap().count()
    }

    #[tokio::test]
    async fn add_then_get_roundtrip() {
        let (dir, store) = store().await;
        let src = source_file(dir.path(), b"hello world");

        store.add("http://o/a", &src, "").await.unwrap();
        let path = store.get("http://o/a", None).await.unwrap().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
        assert!(path.starts_with(dir.path().join(BLOB_DIR)));
    }

    #[tokio::test]
    async fn get_miss_for_unknown_url() {
        let (_dir, store) = store().await;
        assert!(store.get("http://o/none", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn add_is_idempotent_for_same_content() {
        let (dir, store) = store().await;
        let src = source_file(dir.path(), b"stable");

        store.add("http://o/a", &src, "abc").await.unwrap();
        store.add("http://o/a", &src, "abc").await.unwrap();
        assert_eq!(blob_count(dir.path()), 1, "one blob, not two");
        let path = store.get("http://o/a", Some("abc")).await.unwrap().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 6);
    }

    #[tokio::test]
    async fn add_replaces_when_size_changes() {
        let (dir, store) = store().await;
        let small = source_file(dir.path(), b"v1");
        store.add("http://o/a", &small, "").await.unwrap();

        let big = dir.path().join("source2.bin");
        std::fs::write(&big, b"version two, longer").unwrap();
        store.add("http://o/a", &big, "").await.unwrap();

        assert_eq!(blob_count(dir.path()), 1, "old blob removed");
        let path = store.get("http://o/a", None).await.unwrap().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"version two, longer");
    }

    #[tokio::test]
    async fn get_with_wrong_checksum_is_miss() {
        let (dir, store) = store().await;
        let src = source_file(dir.path(), b"data");
        store.add("http://o/a", &src, "aaaa").await.unwrap();
        assert!(store.get("http://o/a", Some("bbbb")).await.unwrap().is_none());
        assert!(store.get("http://o/a", Some("aaaa")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_blob_is_a_miss() {
        let (dir, store) = store().await;
        let src = source_file(dir.path(), b"data");
        store.add("http://o/a", &src, "").await.unwrap();

        let path = store.get("http://o/a", None).await.unwrap().unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(store.get("http://o/a", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cleanup_enforces_hard_size_cap() {
        let (dir, store) = store().await;
        for (i, content) in [b"aaaaaaaaaa", b"bbbbbbbbbb", b"cccccccccc"].iter().enumerate() {
            let src = dir.path().join(format!("s{i}"));
            std::fs::write(&src, content).unwrap();
            store.add(&format!("http://o/{i}"), &src, "").await.unwrap();
            store
                .backdate(&format!("http://o/{i}"), 1000 + i as i64)
                .await
                .unwrap();
        }

        // 30 bytes total, cap at 25: only the oldest row goes.
        store
            .cleanup(Duration::from_secs(3600), 25, 25)
            .await
            .unwrap();
        assert!(store.get("http://o/0", None).await.unwrap().is_none());
        assert!(store.get("http://o/1", None).await.unwrap().is_some());
        assert!(store.get("http://o/2", None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cleanup_age_phase_respects_max_life() {
        let (dir, store) = store().await;
        for i in 0..3 {
            let src = dir.path().join(format!("s{i}"));
            std::fs::write(&src, b"0123456789").unwrap();
            store.add(&format!("http://o/{i}"), &src, "").await.unwrap();
        }
        // Only entry 0 is stale; 1 and 2 were used recently.
        store.backdate("http://o/0", 100).await.unwrap();

        // Over tolerance (10 > 5) but under the hard cap (30 <= 100): the
        // age phase may only evict rows older than max_life.
        store
            .cleanup(Duration::from_secs(60), 5, 100)
            .await
            .unwrap();
        assert!(store.get("http://o/0", None).await.unwrap().is_none());
        assert!(store.get("http://o/1", None).await.unwrap().is_some());
        assert!(store.get("http://o/2", None).await.unwrap().is_some());
    }
}
