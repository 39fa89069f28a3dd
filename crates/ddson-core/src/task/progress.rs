//! Per-task download progress: per-agent byte totals and the aggregator
//! loop that turns them into `Downloading` frames for the caller.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::error::TaskError;
use crate::rpc::DownloadStatus;

use super::{QuitFlag, StatusSink};

/// `(agent_id, bytes_since_last_report)` as forwarded by subtask executors.
pub type ProgressUpdate = (i64, u64);

/// Byte accounting for one task, keyed by agent id.
#[derive(Debug)]
pub struct DownloadProgress {
    start: Instant,
    per_agent: HashMap<i64, u64>,
}

impl DownloadProgress {
    pub fn new() -> Self {
        DownloadProgress {
            start: Instant::now(),
            per_agent: HashMap::new(),
        }
    }

    pub fn update(&mut self, agent_id: i64, bytes: u64) {
        *self.per_agent.entry(agent_id).or_insert(0) += bytes;
    }

    pub fn total_downloaded(&self) -> u64 {
        self.per_agent.values().sum()
    }

    /// Average bytes/second since the task started.
    pub fn total_speed(&self) -> u64 {
        let elapsed = self.start.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.total_downloaded() as f64 / elapsed) as u64
        } else {
            0
        }
    }
}

impl Default for DownloadProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Consume progress updates and emit a `Downloading` frame on the caller
/// stream every `interval`. Exits cleanly when all producers hang up; a
/// failed send trips the quit flag (the caller is gone) and returns the
/// error for the orchestrator to record.
pub async fn run_aggregator(
    mut rx: mpsc::Receiver<ProgressUpdate>,
    sink: StatusSink,
    interval: Duration,
    quit: QuitFlag,
) -> Result<(), TaskError> {
    let mut progress = DownloadProgress::new();
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; skip it so the caller isn't told
    // "downloading, 0 bytes" before any executor has started.
    ticker.tick().await;

    loop {
        tokio::select! {
            update = rx.recv() => {
                match update {
                    Some((agent_id, bytes)) => progress.update(agent_id, bytes),
                    None => return Ok(()),
                }
            }
            _ = ticker.tick() => {
                let frame = DownloadStatus::Downloading {
                    speed: progress.total_speed(),
                    downloaded_bytes: 0,
                    total_downloaded_bytes: progress.total_downloaded(),
                };
                if let Err(e) = sink.send(frame).await {
                    tracing::debug!(error = %e, "caller stream closed, stopping aggregator");
                    quit.trip();
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_sum_across_agents() {
        let mut p = DownloadProgress::new();
        p.update(0, 100);
        p.update(1, 50);
        p.update(0, 25);
        assert_eq!(p.total_downloaded(), 175);
    }

    #[test]
    fn speed_is_zero_at_start() {
        let p = DownloadProgress::new();
        assert_eq!(p.total_speed(), 0);
    }

    #[tokio::test]
    async fn aggregator_emits_downloading_frames() {
        let (sink, mut status_rx) = StatusSink::channel(8);
        let (tx, rx) = mpsc::channel(8);
        let quit = QuitFlag::new();
        let handle = tokio::spawn(run_aggregator(
            rx,
            sink,
            Duration::from_millis(10),
            quit.clone(),
        ));

        tx.send((0, 1000)).await.unwrap();
        tx.send((1, 500)).await.unwrap();

        let frame = status_rx.recv().await.unwrap();
        match frame {
            DownloadStatus::Downloading {
                total_downloaded_bytes,
                ..
            } => assert!(total_downloaded_bytes <= 1500),
            other => panic!("unexpected frame: {other:?}"),
        }

        drop(tx);
        handle.await.unwrap().unwrap();
        assert!(!quit.is_tripped());
    }

    #[tokio::test]
    async fn aggregator_trips_quit_when_caller_vanishes() {
        let (sink, status_rx) = StatusSink::channel(1);
        drop(status_rx);
        let (tx, rx) = mpsc::channel(8);
        let quit = QuitFlag::new();
        let handle = tokio::spawn(run_aggregator(
            rx,
            sink,
            Duration::from_millis(5),
            quit.clone(),
        ));

        tx.send((0, 10)).await.unwrap();
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, TaskError::Transport(_)));
        assert!(quit.is_tripped());
        drop(tx);
    }
}
