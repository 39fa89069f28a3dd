//! Caller-side helpers for the four endpoints. One TCP connection per call.

use anyhow::{anyhow, bail, Result};

use crate::version::PROTOCOL_VERSION;

use super::codec::FrameConn;
use super::wire::{DownloadStatus, Reply, Request};

/// Register with the coordinator. Returns the assigned agent id and the
/// coordinator's version string.
pub async fn register(coordinator: &str, name: &str, port: u16) -> Result<(i64, String)> {
    let mut conn = FrameConn::connect(coordinator).await?;
    conn.send(&Request::Register {
        name: name.to_string(),
        version: PROTOCOL_VERSION.to_string(),
        port,
    })
    .await?;
    match conn.recv::<Reply>().await? {
        Some(Reply::Registered { id, server_version }) => Ok((id, server_version)),
        Some(Reply::Error { message }) => Err(anyhow!(message)),
        other => bail!("unexpected register reply: {other:?}"),
    }
}

/// Send one heartbeat. Returns the server's `(success, message)` verdict;
/// an unknown id is reported through `success = false`, not an error.
pub async fn heartbeat(coordinator: &str, name: &str, id: i64) -> Result<(bool, String)> {
    let mut conn = FrameConn::connect(coordinator).await?;
    conn.send(&Request::Heartbeat {
        name: name.to_string(),
        id,
    })
    .await?;
    match conn.recv::<Reply>().await? {
        Some(Reply::HeartbeatAck { success, message }) => Ok((success, message)),
        Some(Reply::Error { message }) => Err(anyhow!(message)),
        other => bail!("unexpected heartbeat reply: {other:?}"),
    }
}

/// Open a `Download` stream against the coordinator.
pub async fn download(
    coordinator: &str,
    client_id: i64,
    url: &str,
    checksum: Option<&str>,
) -> Result<StatusStream> {
    let mut conn = FrameConn::connect(coordinator).await?;
    conn.send(&Request::Download {
        client_id,
        url: url.to_string(),
        checksum: checksum.unwrap_or_default().to_string(),
    })
    .await?;
    Ok(StatusStream { conn })
}

/// Open a `DownloadPart` stream against an agent.
pub async fn download_part(
    agent_endpoint: &str,
    url: &str,
    offset: u64,
    size: u64,
    client_id: i64,
    subtask_id: u32,
) -> Result<StatusStream> {
    let mut conn = FrameConn::connect(agent_endpoint).await?;
    conn.send(&Request::DownloadPart {
        url: url.to_string(),
        offset,
        size,
        client_id,
        subtask_id,
    })
    .await?;
    Ok(StatusStream { conn })
}

/// Receiving half of a streaming call: yields `DownloadStatus` frames until
/// the server ends the stream cleanly (`None`) or reports a failure (`Err`).
pub struct StatusStream {
    conn: FrameConn,
}

impl StatusStream {
    pub async fn next(&mut self) -> Result<Option<DownloadStatus>> {
        match self.conn.recv::<Reply>().await? {
            Some(Reply::Status(status)) => Ok(Some(status)),
            Some(Reply::Done) => Ok(None),
            Some(Reply::Error { message }) => Err(anyhow!(message)),
            Some(other) => bail!("unexpected frame on status stream: {other:?}"),
            // The peer hung up without `Done`; surface it as a failure so
            // half-written artifacts are never mistaken for completed ones.
            None => bail!("stream closed before completion"),
        }
    }
}
