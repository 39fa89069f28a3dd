//! `DownloadPart` handler: fetch the requested byte range from the origin
//! and stream it back to the coordinator.
//!
//! The whole chunk is buffered in memory before the `Transferring` frames;
//! chunks are bounded by the coordinator's plan size. While the blocking
//! fetch runs, an async ticker reports progress deltas at the status
//! cadence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::httputil;
use crate::rpc::{DownloadStatus, FrameConn, Reply, MAX_DATA_CHUNK};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

pub(super) async fn handle(
    mut conn: FrameConn,
    url: String,
    offset: u64,
    size: u64,
    client_id: i64,
    subtask_id: u32,
) -> Result<()> {
    tracing::info!(url, offset, size, client_id, subtask_id, "download part request");

    let progress = Arc::new(AtomicU64::new(0));
    let mut fetch = {
        let url = url.clone();
        let progress = Arc::clone(&progress);
        tokio::task::spawn_blocking(move || httputil::fetch_range(&url, offset, size, progress))
    };

    let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
    interval.tick().await; // first tick fires immediately; nothing to report yet
    let mut reported = 0u64;

    let fetch_result = loop {
        tokio::select! {
            joined = &mut fetch => {
                break joined.context("fetch join")?;
            }
            _ = interval.tick() => {
                let done = progress.load(Ordering::Relaxed);
                if done > reported {
                    conn.send(&Reply::Status(DownloadStatus::Downloading {
                        speed: 0,
                        downloaded_bytes: done - reported,
                        total_downloaded_bytes: 0,
                    }))
                    .await?;
                    reported = done;
                }
            }
        }
    };

    let data = match fetch_result {
        Ok(data) => data,
        Err(e) => {
            tracing::warn!(subtask_id, error = %e, "range fetch failed");
            conn.send(&Reply::Error {
                message: e.to_string(),
            })
            .await?;
            return Ok(());
        }
    };

    // Whatever arrived after the last tick still counts.
    let done = progress.load(Ordering::Relaxed);
    if done > reported {
        conn.send(&Reply::Status(DownloadStatus::Downloading {
            speed: 0,
            downloaded_bytes: done - reported,
            total_downloaded_bytes: 0,
        }))
        .await?;
    }

    for chunk in data.chunks(MAX_DATA_CHUNK) {
        conn.send(&Reply::Status(DownloadStatus::Transferring {
            data: chunk.to_vec(),
        }))
        .await?;
    }
    conn.send(&Reply::Done).await?;
    tracing::info!(subtask_id, bytes = data.len(), "part upload complete");
    Ok(())
}
