//! `Download` endpoint: enqueue the task and pump its status stream back to
//! the caller until the task resolves.

use std::sync::Arc;

use anyhow::Result;

use crate::rpc::{DownloadStatus, FrameConn, Reply};
use crate::task::StatusSink;

use super::Coordinator;

/// Frames the orchestrator may buffer ahead of the caller's socket.
const SINK_DEPTH: usize = 16;

pub(super) async fn handle(
    coordinator: Arc<Coordinator>,
    mut conn: FrameConn,
    client_id: i64,
    url: String,
    checksum: String,
) -> Result<()> {
    tracing::info!(client_id, url, "download request");

    // First frame is always Pending, with the queue depth as seen before
    // this task joins it.
    conn.send(&Reply::Status(DownloadStatus::Pending {
        number_in_queue: coordinator.queue.depth() as u32,
        client_count: coordinator.registry.count() as u32,
        message: "download request is being processed".into(),
    }))
    .await?;

    let checksum = Some(checksum).filter(|c| !c.is_empty());
    let (sink, mut status_rx) = StatusSink::channel(SINK_DEPTH);
    let (task_id, done_rx) = coordinator.queue.enqueue(url, checksum, sink);

    // Forward status frames until the orchestrator drops the sink. A send
    // failure means the caller disconnected: dropping the receiver makes the
    // orchestrator's next status send fail, which fails the task and trips
    // its quit flag.
    let mut caller_gone = false;
    while let Some(status) = status_rx.recv().await {
        if conn.send(&Reply::Status(status)).await.is_err() {
            caller_gone = true;
            break;
        }
    }
    if caller_gone {
        tracing::info!(task_id, "caller disconnected, abandoning stream");
        drop(status_rx);
        let _ = done_rx.await; // let the orchestrator wind the task down
        return Ok(());
    }

    match done_rx.await {
        Ok(Ok(())) => {
            conn.send(&Reply::Done).await?;
            tracing::info!(task_id, "download stream completed");
        }
        Ok(Err(e)) => {
            let message = format!("{e:#}");
            tracing::warn!(task_id, error = %message, "download stream failed");
            let _ = conn.send(&Reply::Error { message }).await;
        }
        Err(_) => {
            let _ = conn
                .send(&Reply::Error {
                    message: "task abandoned by coordinator".into(),
                })
                .await;
        }
    }
    Ok(())
}
