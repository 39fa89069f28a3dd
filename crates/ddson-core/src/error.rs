//! Task-level error kinds.
//!
//! Kept as a typed enum (instead of bare anyhow) so the orchestrator and the
//! RPC layer can classify failures: per-subtask transport and origin errors
//! are retried, while the fatal kinds surface to the caller unchanged.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    /// Origin did not advertise `Accept-Ranges: bytes` or gave no usable
    /// `Content-Length`. Fatal to the task.
    #[error("origin does not support ranged downloads")]
    RangeNotSupported,

    /// Origin answered with an unexpected HTTP status.
    #[error("origin returned HTTP {status}")]
    OriginHttp { status: u32 },

    /// A transfer delivered fewer (or more) bytes than requested.
    #[error("short read: got {got} bytes, want {want}")]
    ShortRead { got: u64, want: u64 },

    /// Subtask ranges do not form a contiguous cover. Fatal.
    #[error("subtask offset mismatch: got {got}, want {want}")]
    OffsetMismatch { got: u64, want: u64 },

    /// Combined file does not hash to the requested checksum. Fatal.
    #[error("checksum mismatch: got {got}, want {want}")]
    ChecksumMismatch { got: String, want: String },

    /// Registration refused because the peer address is banned.
    #[error("agent {address} is banned until unix second {until_unix}")]
    AgentBanned { address: String, until_unix: i64 },

    /// Heartbeat or lookup for an id the registry does not know.
    #[error("agent #{id} is not registered")]
    AgentNotRegistered { id: i64 },

    /// MAJOR or MINOR protocol version differs between the two sides.
    #[error("incompatible protocol version: self {ours}, peer {theirs}")]
    VersionIncompatible { ours: String, theirs: String },

    /// Socket-level failure on the coordinator-agent or caller link.
    #[error("transport error: {0}")]
    Transport(String),

    /// Cache index or blob directory I/O failed.
    #[error("cache I/O error: {0}")]
    CacheIo(String),

    /// A state the code promises can never happen.
    #[error("internal invariant violation: {0}")]
    InternalInvariantViolation(String),
}

impl From<std::io::Error> for TaskError {
    fn from(e: std::io::Error) -> Self {
        TaskError::Transport(e.to_string())
    }
}
