//! Per-connection dispatch for the coordinator's endpoints.

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpStream;

use crate::rpc::{FrameConn, Reply, Request};

use super::{download, heartbeat, register, Coordinator};

pub(super) async fn handle_conn(coordinator: Arc<Coordinator>, stream: TcpStream) -> Result<()> {
    let mut conn = FrameConn::new(stream);
    let peer = conn.peer_addr()?;

    let Some(request) = conn.recv::<Request>().await? else {
        return Ok(()); // connected and left without a word
    };

    match request {
        Request::Register {
            name,
            version,
            port,
        } => register::handle(&coordinator, &mut conn, peer, &name, &version, port).await,
        Request::Heartbeat { name, id } => {
            heartbeat::handle(&coordinator, &mut conn, &name, id).await
        }
        Request::Download {
            client_id,
            url,
            checksum,
        } => download::handle(coordinator, conn, client_id, url, checksum).await,
        Request::DownloadPart { .. } => {
            conn.send(&Reply::Error {
                message: "coordinator does not serve DownloadPart".into(),
            })
            .await?;
            Ok(())
        }
    }
}
