//! Per-task orchestration: probe -> cache lookup -> plan -> dispatch ->
//! assemble -> validate & deliver.
//!
//! Any phase failure marks the task Failed, trips its quit flag, and
//! reports the first observed error. The dispatch phase always waits for
//! every subtask executor's finish signal, so no executor is still racing
//! the teardown.

mod assemble;
mod exec;
mod plan;

pub use plan::plan_subtasks;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::cache::CacheStore;
use crate::checksum;
use crate::config::CoordinatorConfig;
use crate::error::TaskError;
use crate::httputil;
use crate::registry::AgentRegistry;
use crate::rpc::{DownloadStatus, MAX_DATA_CHUNK};
use crate::task::{run_aggregator, StatusSink, Task, TaskState};

/// Run one task through all phases. On return the task is either Completed
/// with its artifact cached, or Failed with the first observed error; no
/// subtask executor outlives this call.
pub async fn execute_task(
    task: &mut Task,
    registry: &Arc<AgentRegistry>,
    cache: &Arc<CacheStore>,
    cfg: &CoordinatorConfig,
) -> Result<()> {
    let result = run_phases(task, registry, cache, cfg).await;
    match &result {
        Ok(()) => {
            task.state = TaskState::Completed;
            tracing::info!(task = task.id, url = %task.url, "task completed");
        }
        Err(e) => {
            task.state = TaskState::Failed;
            task.quit.trip();
            tracing::error!(task = task.id, url = %task.url, error = %e, "task failed");
        }
    }
    result
}

async fn run_phases(
    task: &mut Task,
    registry: &Arc<AgentRegistry>,
    cache: &Arc<CacheStore>,
    cfg: &CoordinatorConfig,
) -> Result<()> {
    // Phase A: the origin must support ranged downloads and disclose a size.
    let probe_url = task.url.clone();
    let total_size = tokio::task::spawn_blocking(move || httputil::probe_origin(&probe_url))
        .await
        .context("probe join")??;
    tracing::info!(task = task.id, total_size, "origin probe ok");

    // Phase B: a cached artifact short-circuits the whole download.
    match cache.get(&task.url, task.checksum.as_deref()).await {
        Ok(Some(path)) => {
            tracing::info!(task = task.id, blob = %path.display(), "cache hit");
            task.state = TaskState::Transferring;
            stream_file(&path, &task.sink).await?;
            return Ok(());
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(task = task.id, error = %e, "cache lookup failed, treating as miss"),
    }

    // Phase C: plan fixed-size chunks into a task-scoped temp directory.
    task.state = TaskState::Downloading;
    let temp_dir = tempfile::Builder::new()
        .prefix("ddson-task-")
        .tempdir()
        .context("create task temp dir")?;
    task.subtasks = plan::plan_subtasks(&task.url, total_size, cfg.chunk_size, temp_dir.path());
    let subtask_count = task.subtasks.len();
    tracing::info!(task = task.id, subtask_count, chunk_size = cfg.chunk_size, "planned subtasks");

    // Phase D: one executor per subtask, one aggregator for progress.
    let (progress_tx, progress_rx) = mpsc::channel(64);
    let aggregator = tokio::spawn(run_aggregator(
        progress_rx,
        task.sink.clone(),
        cfg.status_interval(),
        task.quit.clone(),
    ));

    let (finish_tx, mut finish_rx) = mpsc::channel(subtask_count.max(1));
    for subtask in &task.subtasks {
        tokio::spawn(exec::run_subtask(
            exec::SubtaskSpec::from(subtask),
            Arc::clone(registry),
            progress_tx.clone(),
            task.quit.clone(),
            finish_tx.clone(),
            cfg.subtask_retries,
        ));
    }
    // Executors hold the only remaining senders; the channels close when the
    // last executor exits.
    drop(finish_tx);
    drop(progress_tx);

    let mut first_error_id: Option<u32> = None;
    for _ in 0..subtask_count {
        let Some(outcome) = finish_rx.recv().await else {
            return Err(TaskError::InternalInvariantViolation(
                "subtask executor exited without a finish signal".into(),
            )
            .into());
        };
        let subtask = task
            .subtasks
            .get_mut(outcome.id as usize)
            .ok_or_else(|| TaskError::InternalInvariantViolation(format!(
                "finish signal for unknown subtask {}",
                outcome.id
            )))?;
        subtask.assigned_to = outcome.assigned_to;
        subtask.retry_count = outcome.retry_count;
        if let Some(e) = outcome.error {
            tracing::warn!(task = task.id, subtask = outcome.id, error = %e, "subtask failed terminally");
            subtask.error = Some(e);
            if first_error_id.is_none() {
                first_error_id = Some(outcome.id);
            }
            task.quit.trip();
        }
    }

    let aggregator_result = aggregator.await.context("aggregator join")?;

    if let Some(id) = first_error_id {
        let e = task.subtasks[id as usize]
            .error
            .take()
            .unwrap_or_else(|| TaskError::InternalInvariantViolation("lost subtask error".into()).into());
        return Err(e);
    }
    // No subtask failed: a dead caller stream is the remaining failure mode.
    aggregator_result?;

    // Phase E: reassemble in offset order and check the cover.
    let assemble_dir = temp_dir.path().to_path_buf();
    let mut subtasks = std::mem::take(&mut task.subtasks);
    let (subtasks, combined) = tokio::task::spawn_blocking(move || {
        let result = assemble::combine(&mut subtasks, total_size, &assemble_dir);
        (subtasks, result)
    })
    .await
    .context("assemble join")?;
    task.subtasks = subtasks;
    let combined = combined?;

    // Phase F: validate when asked, stream to the caller, register in cache.
    if let Some(want) = task.checksum.clone() {
        task.state = TaskState::Validating;
        task.sink.send(DownloadStatus::Validating).await?;
        let combined_path = combined.path().to_path_buf();
        tokio::task::spawn_blocking(move || checksum::verify_file(&combined_path, &want))
            .await
            .context("checksum join")??;
    }

    task.state = TaskState::Transferring;
    stream_file(combined.path(), &task.sink).await?;

    cache
        .add(
            &task.url,
            combined.path(),
            task.checksum.as_deref().unwrap_or(""),
        )
        .await
        .map_err(|e| TaskError::CacheIo(format!("{e:#}")))?;
    if let Err(e) = cache
        .cleanup(cfg.cache_max_life(), cfg.cache_tolerance_size, cfg.cache_max_size)
        .await
    {
        tracing::warn!(error = %e, "cache cleanup failed");
    }

    Ok(())
}

/// Send a file over the caller stream as `Transferring` frames of at most
/// `MAX_DATA_CHUNK` bytes.
async fn stream_file(path: &Path, sink: &StatusSink) -> Result<()> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("open {}", path.display()))?;
    let mut buf = vec![0u8; MAX_DATA_CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        sink.send(DownloadStatus::Transferring {
            data: buf[..n].to_vec(),
        })
        .await?;
    }
    Ok(())
}
