//! Wire protocol between callers, coordinator, and agents.
//!
//! Four logical endpoints (`Register`, `Heartbeat`, `Download` on the
//! coordinator; `DownloadPart` on the agent) carried as length-delimited
//! bincode frames over TCP, one connection per call. Unary calls get one
//! reply frame; streaming calls get `Status` frames terminated by `Done`
//! or `Error`.

mod codec;
mod wire;

pub mod client;

pub use codec::FrameConn;
pub use wire::{DownloadStatus, Reply, Request, MAX_DATA_CHUNK};
