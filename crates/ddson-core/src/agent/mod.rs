//! Agent runtime: serve `DownloadPart` for the coordinator, stay registered
//! through the heartbeat loop, reconnect when the coordinator drops us.

mod download_part;

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

use crate::rpc::{client, FrameConn, Reply, Request};

/// Client-side heartbeat cadence (server timeout is 20 s).
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// Back-off before re-registering after a disconnect.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Consecutive-error budget before the agent gives up on a registration.
const MAX_HEARTBEAT_ERRORS: u32 = 3;

/// Accept loop for the agent's own listener. Serves `DownloadPart` only.
pub async fn serve(listener: TcpListener) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await.context("accept")?;
        tokio::spawn(async move {
            if let Err(e) = handle_conn(stream).await {
                tracing::debug!(%peer, error = %e, "part connection ended with error");
            }
        });
    }
}

async fn handle_conn(stream: TcpStream) -> Result<()> {
    let mut conn = FrameConn::new(stream);
    let Some(request) = conn.recv::<Request>().await? else {
        return Ok(());
    };
    match request {
        Request::DownloadPart {
            url,
            offset,
            size,
            client_id,
            subtask_id,
        } => download_part::handle(conn, url, offset, size, client_id, subtask_id).await,
        other => {
            conn.send(&Reply::Error {
                message: format!("agent does not serve this request: {other:?}"),
            })
            .await?;
            Ok(())
        }
    }
}

/// Full agent mode: bind the part listener, then register with the
/// coordinator and heartbeat forever, re-registering after disconnects.
pub async fn run(coordinator: &str, name: &str, port: u16) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("bind agent port {port}"))?;
    tracing::info!(name, port, coordinator, "agent listening");

    tokio::spawn({
        let listener_task = serve(listener);
        async move {
            if let Err(e) = listener_task.await {
                tracing::error!(error = %e, "agent listener died");
            }
        }
    });

    loop {
        match client::register(coordinator, name, port).await {
            Ok((id, server_version)) => {
                tracing::info!(id, server_version, "registered with coordinator");
                heartbeat_loop(coordinator, name, id).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "registration failed");
            }
        }
        tracing::info!(delay = ?RECONNECT_DELAY, "reconnecting to coordinator");
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// Heartbeat every 5 s until the error counter exceeds its budget. Failures
/// bump the counter, successes decrement it, so one blip doesn't kill a
/// long-lived registration.
async fn heartbeat_loop(coordinator: &str, name: &str, id: i64) {
    let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    interval.tick().await; // first tick is immediate; we just registered
    let mut err_count: u32 = 0;

    loop {
        interval.tick().await;
        match client::heartbeat(coordinator, name, id).await {
            Ok((true, _message)) => {
                err_count = err_count.saturating_sub(1);
            }
            Ok((false, message)) => {
                err_count += 1;
                tracing::warn!(id, err_count, message, "heartbeat rejected");
            }
            Err(e) => {
                err_count += 1;
                tracing::warn!(id, err_count, error = %e, "heartbeat failed");
            }
        }
        if err_count > MAX_HEARTBEAT_ERRORS {
            tracing::warn!(id, "too many heartbeat errors, disconnecting");
            return;
        }
    }
}
