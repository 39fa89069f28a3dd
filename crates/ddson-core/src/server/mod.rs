//! Coordinator runtime: workspace bootstrap, accept loop, queue runner.

mod conn;
mod download;
mod heartbeat;
mod register;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::cache::CacheStore;
use crate::config::{self, CoordinatorConfig};
use crate::orchestrator;
use crate::registry::AgentRegistry;
use crate::task::TaskQueue;

/// Shared state behind the coordinator's three endpoints.
pub struct Coordinator {
    pub registry: Arc<AgentRegistry>,
    pub cache: Arc<CacheStore>,
    pub queue: Arc<TaskQueue>,
    pub cfg: CoordinatorConfig,
}

impl Coordinator {
    /// Open the workspace (blob dir + cache index) and assemble the shared
    /// state. Does not bind any socket yet.
    pub async fn new(workspace: &Path, cfg: CoordinatorConfig) -> Result<Arc<Self>> {
        let cache = Arc::new(CacheStore::open(workspace).await?);
        let registry = AgentRegistry::new(cfg.heartbeat_timeout(), cfg.ban_duration());
        Ok(Arc::new(Coordinator {
            registry,
            cache,
            queue: Arc::new(TaskQueue::new()),
            cfg,
        }))
    }

    /// Start the queue runner: dequeues tasks FIFO and executes them one at
    /// a time, resolving each task's done signal with the outcome.
    pub fn spawn_queue_runner(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let queued = coordinator.queue.dequeue().await;
                let crate::task::QueuedTask { mut task, done } = queued;
                tracing::info!(task = task.id, url = %task.url, "running task");
                let result = orchestrator::execute_task(
                    &mut task,
                    &coordinator.registry,
                    &coordinator.cache,
                    &coordinator.cfg,
                )
                .await;
                // Drop the task (and with it the status sink) before
                // resolving done, so the handler drains the stream fully and
                // then observes the outcome.
                drop(task);
                let _ = done.send(result);
            }
        })
    }

    /// Accept loop: one spawned handler per connection.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await.context("accept")?;
            let coordinator = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = conn::handle_conn(coordinator, stream).await {
                    tracing::debug!(%peer, error = %e, "connection handler ended with error");
                }
            });
        }
    }
}

/// Bind and run the coordinator on `port` until the process dies.
/// Bind failure is an error the binary turns into a non-zero exit.
pub async fn run_coordinator(port: u16) -> Result<()> {
    let workspace = config::workspace_dir()?;
    let cfg = config::load_or_init(&workspace)?;
    let coordinator = Coordinator::new(&workspace, cfg).await?;

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("bind port {port}"))?;
    tracing::info!(port, workspace = %workspace.display(), "coordinator listening");

    coordinator.spawn_queue_runner();
    coordinator.serve(listener).await
}
