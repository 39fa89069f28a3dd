//! Length-delimited bincode framing over a TCP stream.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::TaskError;

/// Frames carry at most one data chunk plus enum overhead; anything bigger
/// is a protocol violation, not a large message.
const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// A framed connection carrying bincode-encoded protocol messages.
pub struct FrameConn {
    inner: Framed<TcpStream, LengthDelimitedCodec>,
}

impl FrameConn {
    pub fn new(stream: TcpStream) -> Self {
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(MAX_FRAME_LEN)
            .new_codec();
        FrameConn {
            inner: Framed::new(stream, codec),
        }
    }

    /// Connect to `addr` ("host:port") and wrap the stream.
    pub async fn connect(addr: &str) -> Result<Self, TaskError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TaskError::Transport(format!("connect {addr}: {e}")))?;
        Ok(FrameConn::new(stream))
    }

    /// Remote address of the peer (used by `Register` to learn the agent's
    /// network address).
    pub fn peer_addr(&self) -> Result<SocketAddr, TaskError> {
        self.inner
            .get_ref()
            .peer_addr()
            .map_err(|e| TaskError::Transport(format!("peer addr: {e}")))
    }

    /// Encode and send one message. Blocks on network flow control.
    pub async fn send<T: bincode::Encode>(&mut self, msg: &T) -> Result<(), TaskError> {
        let bytes = bincode::encode_to_vec(msg, bincode::config::standard())
            .map_err(|e| TaskError::Transport(format!("encode: {e}")))?;
        self.inner
            .send(Bytes::from(bytes))
            .await
            .map_err(|e| TaskError::Transport(format!("send: {e}")))
    }

    /// Receive and decode one message. `Ok(None)` on clean end-of-stream.
    pub async fn recv<T: bincode::Decode<()>>(&mut self) -> Result<Option<T>, TaskError> {
        match self.inner.next().await {
            None => Ok(None),
            Some(Err(e)) => Err(TaskError::Transport(format!("recv: {e}"))),
            Some(Ok(frame)) => {
                let (msg, _) = bincode::decode_from_slice(&frame, bincode::config::standard())
                    .map_err(|e| TaskError::Transport(format!("decode: {e}")))?;
                Ok(Some(msg))
            }
        }
    }
}
