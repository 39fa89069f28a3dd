//! `Heartbeat` endpoint. An unknown id or name mismatch is reported via
//! `success = false`, never as a transport-level error.

use anyhow::Result;

use crate::rpc::{FrameConn, Reply};

use super::Coordinator;

pub(super) async fn handle(
    coordinator: &Coordinator,
    conn: &mut FrameConn,
    name: &str,
    id: i64,
) -> Result<()> {
    let (success, message) = match coordinator.registry.get_by_id(id) {
        None => (false, format!("agent #{id} not registered")),
        Some(info) if info.name != name => (
            false,
            format!("agent name mismatch: expected {}, got {name}", info.name),
        ),
        Some(_) => match coordinator.registry.heartbeat(id) {
            Ok(()) => (true, "heartbeat received".to_string()),
            // The watchdog can retire the agent between lookup and reset.
            Err(_) => (false, format!("agent #{id} not registered")),
        },
    };

    tracing::debug!(id, name, success, "heartbeat");
    conn.send(&Reply::HeartbeatAck { success, message }).await?;
    Ok(())
}
