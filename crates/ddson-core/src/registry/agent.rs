//! Agent identity and per-agent registry bookkeeping.

use tokio::time::Instant;

/// Immutable identity of a registered agent, handed to subtask executors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInfo {
    /// Registry-assigned id; monotonic, never reused within a process.
    pub id: i64,
    pub name: String,
    pub version: String,
    /// Peer IP as seen by the coordinator (no port).
    pub address: String,
    /// Port the agent's own listener accepts `DownloadPart` on.
    pub port: u16,
}

impl AgentInfo {
    /// `host:port` of the agent's listener.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Free,
    Busy,
}

/// Mutable registry slot for one agent.
#[derive(Debug)]
pub(super) struct AgentSlot {
    pub(super) info: AgentInfo,
    pub(super) state: AgentState,
    pub(super) error_count: u32,
    /// Heartbeat deadline; the watchdog retires the agent when it passes.
    pub(super) deadline: Instant,
}
