//! Per-subtask executor: place the chunk on an agent, drain the
//! `DownloadPart` stream into the target file, retry on failure.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::error::TaskError;
use crate::registry::{AgentInfo, AgentRegistry};
use crate::rpc::{client, DownloadStatus};
use crate::task::{ProgressUpdate, QuitFlag, Subtask};

/// The slice of subtask state an executor needs; the orchestrator keeps the
/// `Subtask` itself and applies the outcome afterwards.
#[derive(Debug, Clone)]
pub(super) struct SubtaskSpec {
    pub id: u32,
    pub url: String,
    pub offset: u64,
    pub size: u64,
    pub target_file: std::path::PathBuf,
}

impl From<&Subtask> for SubtaskSpec {
    fn from(st: &Subtask) -> Self {
        SubtaskSpec {
            id: st.id,
            url: st.url.clone(),
            offset: st.offset,
            size: st.size,
            target_file: st.target_file.clone(),
        }
    }
}

/// What one executor reports on the finish channel, exactly once.
#[derive(Debug)]
pub(super) struct SubtaskOutcome {
    pub id: u32,
    pub assigned_to: i64,
    pub retry_count: u32,
    /// Terminal error after the retry budget; `None` on success or when the
    /// executor wound down because the task's quit flag tripped.
    pub error: Option<anyhow::Error>,
}

/// Run one subtask to completion or exhaustion. Signals the finish channel
/// exactly once, regardless of outcome.
pub(super) async fn run_subtask(
    spec: SubtaskSpec,
    registry: Arc<AgentRegistry>,
    progress_tx: mpsc::Sender<ProgressUpdate>,
    quit: QuitFlag,
    finish_tx: mpsc::Sender<SubtaskOutcome>,
    max_retries: u32,
) {
    let assigned = Arc::new(AtomicI64::new(-1));
    let mut retry_count = 0u32;
    let mut error: Option<anyhow::Error> = None;

    loop {
        if quit.is_tripped() {
            tracing::debug!(subtask = spec.id, "quit flag tripped, winding down");
            break;
        }

        let result = registry
            .run_task(|agent| {
                let spec = spec.clone();
                let progress_tx = progress_tx.clone();
                let quit = quit.clone();
                let assigned = Arc::clone(&assigned);
                async move {
                    assigned.store(agent.id, Ordering::Relaxed);
                    download_chunk(&spec, &agent, &progress_tx, &quit).await
                }
            })
            .await;

        match result {
            Ok(()) => {
                error = None;
                break;
            }
            Err(e) => {
                retry_count += 1;
                tracing::warn!(subtask = spec.id, retry_count, error = %e, "subtask attempt failed");
                error = Some(e);
                if retry_count > max_retries {
                    break;
                }
            }
        }
    }

    if quit.is_tripped() {
        // The task is already failing for another reason; this executor's
        // abort is not a terminal error of its own.
        error = None;
    }

    let outcome = SubtaskOutcome {
        id: spec.id,
        assigned_to: assigned.load(Ordering::Relaxed),
        retry_count,
        error,
    };
    if finish_tx.send(outcome).await.is_err() {
        tracing::error!(subtask = spec.id, "finish channel closed before signal");
    }
}

/// One attempt: open a `DownloadPart` stream to `agent` and drain it into
/// the target file, forwarding progress deltas to the aggregator.
async fn download_chunk(
    spec: &SubtaskSpec,
    agent: &AgentInfo,
    progress_tx: &mpsc::Sender<ProgressUpdate>,
    quit: &QuitFlag,
) -> Result<()> {
    tracing::debug!(
        subtask = spec.id,
        agent = agent.id,
        offset = spec.offset,
        size = spec.size,
        "downloading chunk"
    );
    let mut stream = client::download_part(
        &agent.endpoint(),
        &spec.url,
        spec.offset,
        spec.size,
        agent.id,
        spec.id,
    )
    .await?;

    let mut file = tokio::fs::File::create(&spec.target_file)
        .await
        .with_context(|| format!("create {}", spec.target_file.display()))?;

    let mut received = 0u64;
    loop {
        if quit.is_tripped() {
            bail!("subtask {} aborted", spec.id);
        }
        match stream.next().await? {
            None => break,
            Some(DownloadStatus::Downloading {
                downloaded_bytes, ..
            }) => {
                // The aggregator may already be gone when the task is
                // tearing down; progress is best-effort.
                let _ = progress_tx.send((agent.id, downloaded_bytes)).await;
            }
            Some(DownloadStatus::Transferring { data }) => {
                file.write_all(&data)
                    .await
                    .with_context(|| format!("write {}", spec.target_file.display()))?;
                received += data.len() as u64;
            }
            Some(other) => bail!("unexpected status on DownloadPart stream: {other:?}"),
        }
    }

    file.flush().await?;
    if received != spec.size {
        return Err(TaskError::ShortRead {
            got: received,
            want: spec.size,
        }
        .into());
    }
    tracing::debug!(subtask = spec.id, agent = agent.id, received, "chunk complete");
    Ok(())
}
