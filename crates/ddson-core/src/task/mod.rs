//! Download tasks: per-request state, subtasks, the caller-facing status
//! sink, and the FIFO queue the coordinator's runner drains.

mod progress;

pub use progress::{run_aggregator, DownloadProgress, ProgressUpdate};

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, Notify};

use crate::error::TaskError;
use crate::rpc::DownloadStatus;

pub type TaskId = i64;

/// Cooperative cancellation for one task. Single writer, many readers,
/// transitions only false -> true; Release/Acquire ordering makes the write
/// visible to every subtask executor.
#[derive(Debug, Clone, Default)]
pub struct QuitFlag(Arc<AtomicBool>);

impl QuitFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Downloading,
    Validating,
    Transferring,
    Completed,
    Failed,
}

/// One contiguous byte range assigned to a single agent fetch.
#[derive(Debug)]
pub struct Subtask {
    /// Unique within the task, assigned in planning order starting at 0.
    pub id: u32,
    pub url: String,
    pub offset: u64,
    pub size: u64,
    /// Where the fetched chunk lands, inside the task's temp directory.
    pub target_file: PathBuf,
    /// Last agent id this subtask ran on, or -1.
    pub assigned_to: i64,
    pub retry_count: u32,
    /// Terminal error after the retry budget is spent.
    pub error: Option<anyhow::Error>,
}

/// Caller-facing status stream handle. Cloneable so the aggregator and the
/// delivery phase can write to the same stream; a failed send means the
/// caller is gone.
#[derive(Clone)]
pub struct StatusSink {
    tx: mpsc::Sender<DownloadStatus>,
}

impl StatusSink {
    /// Build a sink plus the receiving half the RPC layer forwards from.
    pub fn channel(depth: usize) -> (StatusSink, mpsc::Receiver<DownloadStatus>) {
        let (tx, rx) = mpsc::channel(depth);
        (StatusSink { tx }, rx)
    }

    pub async fn send(&self, status: DownloadStatus) -> Result<(), TaskError> {
        self.tx
            .send(status)
            .await
            .map_err(|_| TaskError::Transport("caller stream closed".into()))
    }
}

/// One caller `Download` request.
pub struct Task {
    pub id: TaskId,
    pub url: String,
    pub checksum: Option<String>,
    pub state: TaskState,
    pub quit: QuitFlag,
    pub subtasks: Vec<Subtask>,
    pub sink: StatusSink,
}

impl Task {
    pub fn new(id: TaskId, url: String, checksum: Option<String>, sink: StatusSink) -> Self {
        Task {
            id,
            url,
            checksum,
            state: TaskState::Pending,
            quit: QuitFlag::new(),
            subtasks: Vec::new(),
            sink,
        }
    }
}

/// A task waiting in the queue, bundled with the completion signal the
/// `Download` handler blocks on.
pub struct QueuedTask {
    pub task: Task,
    pub done: oneshot::Sender<anyhow::Result<()>>,
}

/// FIFO task queue. The queue runner executes tasks one at a time in
/// arrival order.
#[derive(Default)]
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

#[derive(Default)]
struct QueueInner {
    queue: VecDeque<QueuedTask>,
    next_id: TaskId,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new task; returns its id and the receiver resolved when the
    /// task finishes (either way).
    pub fn enqueue(
        &self,
        url: String,
        checksum: Option<String>,
        sink: StatusSink,
    ) -> (TaskId, oneshot::Receiver<anyhow::Result<()>>) {
        let (done_tx, done_rx) = oneshot::channel();
        let id = {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.queue.push_back(QueuedTask {
                task: Task::new(id, url, checksum, sink),
                done: done_tx,
            });
            id
        };
        self.notify.notify_one();
        (id, done_rx)
    }

    /// Number of tasks waiting (excludes the one currently executing).
    pub fn depth(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    /// Wait for and take the next task in FIFO order.
    pub async fn dequeue(&self) -> QueuedTask {
        loop {
            let notified = self.notify.notified();
            if let Some(queued) = self.inner.lock().unwrap().queue.pop_front() {
                return queued;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quit_flag_trips_once_and_stays() {
        let quit = QuitFlag::new();
        assert!(!quit.is_tripped());
        quit.trip();
        assert!(quit.is_tripped());
        quit.trip();
        assert!(quit.is_tripped());
    }

    #[tokio::test]
    async fn queue_is_fifo_with_monotonic_ids() {
        let queue = TaskQueue::new();
        let (sink, _rx) = StatusSink::channel(4);
        let (id_a, _done_a) = queue.enqueue("http://o/a".into(), None, sink.clone());
        let (id_b, _done_b) = queue.enqueue("http://o/b".into(), None, sink);
        assert_eq!((id_a, id_b), (0, 1));
        assert_eq!(queue.depth(), 2);

        let first = queue.dequeue().await;
        assert_eq!(first.task.url, "http://o/a");
        let second = queue.dequeue().await;
        assert_eq!(second.task.url, "http://o/b");
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn dequeue_wakes_on_enqueue() {
        let queue = Arc::new(TaskQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await.task.url })
        };
        tokio::task::yield_now().await;
        let (sink, _rx) = StatusSink::channel(4);
        queue.enqueue("http://o/late".into(), None, sink);
        assert_eq!(waiter.await.unwrap(), "http://o/late");
    }

    #[tokio::test]
    async fn sink_send_fails_after_receiver_drops() {
        let (sink, rx) = StatusSink::channel(1);
        drop(rx);
        let err = sink.send(DownloadStatus::Validating).await.unwrap_err();
        assert!(matches!(err, TaskError::Transport(_)));
    }
}
