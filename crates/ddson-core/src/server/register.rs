//! `Register` endpoint: version gate, ban check, registry insert.

use std::net::SocketAddr;

use anyhow::Result;

use crate::rpc::{FrameConn, Reply};
use crate::version::{Version, PROTOCOL_VERSION};

use super::Coordinator;

pub(super) async fn handle(
    coordinator: &Coordinator,
    conn: &mut FrameConn,
    peer: SocketAddr,
    name: &str,
    version: &str,
    port: u16,
) -> Result<()> {
    let reply = match admit(coordinator, peer, name, version, port) {
        Ok(id) => Reply::Registered {
            id,
            server_version: PROTOCOL_VERSION.to_string(),
        },
        Err(message) => Reply::Error { message },
    };
    conn.send(&reply).await?;
    Ok(())
}

fn admit(
    coordinator: &Coordinator,
    peer: SocketAddr,
    name: &str,
    version: &str,
    port: u16,
) -> Result<i64, String> {
    let agent_version =
        Version::parse(version).map_err(|_| format!("invalid version format: {version}"))?;
    let ours = Version::current();
    if !ours.compatible_with(&agent_version) {
        return Err(crate::error::TaskError::VersionIncompatible {
            ours: ours.to_string(),
            theirs: agent_version.to_string(),
        }
        .to_string());
    }

    // The registration address comes from the transport, not the request:
    // an agent cannot claim someone else's address. The port is the agent's
    // own listener, which we cannot learn from the connection.
    let address = peer.ip().to_string();
    tracing::info!(name, %address, port, version, "agent registering");

    let info = coordinator
        .registry
        .add(name, version, &address, port)
        .map_err(|e| e.to_string())?;
    Ok(info.id)
}
