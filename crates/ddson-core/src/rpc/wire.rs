//! Message shapes for the coordinator/agent protocol.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Upper bound on one `Transferring` payload.
pub const MAX_DATA_CHUNK: usize = 1024 * 1024;

/// First (and only) frame a caller sends on a fresh connection.
#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub enum Request {
    /// Agent announces itself to the coordinator. The coordinator learns the
    /// agent's address from the transport; `port` is where the agent's own
    /// listener accepts `DownloadPart` calls.
    Register {
        name: String,
        version: String,
        port: u16,
    },
    /// Agent liveness ping.
    Heartbeat { name: String, id: i64 },
    /// Caller asks the coordinator for an artifact.
    Download {
        client_id: i64,
        url: String,
        /// Hex SHA-256, empty when the caller skips validation.
        checksum: String,
    },
    /// Coordinator asks an agent for one chunk.
    DownloadPart {
        url: String,
        offset: u64,
        size: u64,
        client_id: i64,
        subtask_id: u32,
    },
}

/// Status frames emitted on `Download` and `DownloadPart` streams.
#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub enum DownloadStatus {
    /// First frame on every `Download` stream.
    Pending {
        number_in_queue: u32,
        client_count: u32,
        message: String,
    },
    /// Transfer progress. On `Download` streams the coordinator fills
    /// `speed` and `total_downloaded_bytes`; on `DownloadPart` streams the
    /// agent fills `downloaded_bytes` with the delta since its last frame.
    Downloading {
        speed: u64,
        downloaded_bytes: u64,
        total_downloaded_bytes: u64,
    },
    /// Checksum verification in progress; precedes any `Transferring`.
    Validating,
    /// A slice of the artifact, at most `MAX_DATA_CHUNK` bytes.
    Transferring { data: Vec<u8> },
}

/// Server -> client frames.
#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub enum Reply {
    Registered { id: i64, server_version: String },
    HeartbeatAck { success: bool, message: String },
    Status(DownloadStatus),
    /// Clean end of a streaming call.
    Done,
    /// The call failed; the stream ends here.
    Error { message: String },
}
