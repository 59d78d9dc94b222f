//! # LedgerMesh Wire Transport
//!
//! Framed JSON messaging over per-message TCP connections for the LedgerMesh
//! cluster. Every protocol message is a self-contained JSON object sent over
//! a fresh outbound connection and answered (when the message type expects a
//! reply) on the same connection before it is closed.
//!
//! The transport deliberately avoids connection pooling: peers in this
//! protocol family exchange a handful of small messages per consensus round,
//! and one-connection-per-message keeps failure handling trivial: a refused
//! or timed-out connection is the complete failure mode, with no half-open
//! stream state to reconcile.
//!
//! ## Port layout
//!
//! Each peer exposes four inbound listeners at fixed offsets from its base
//! port, one per protocol plane, so a slow phase cannot head-of-line block
//! another:
//!
//! - **protocol** (base): prepare / propose / legacy learn / feasibility query
//! - **verification** (base + 1): acceptor-to-acceptor vote broadcast
//! - **learn** (base + 2): verification outcomes unicast to the proposer
//! - **directory** (base + 3): peer registration records
//!
//! ## Framing
//!
//! Messages are newline-delimited JSON: the serialized object followed by a
//! single `\n`. A reader accepts an EOF-terminated final frame as well, so a
//! sender that closes its write half immediately after the payload is still
//! understood. Frames above [`MAX_FRAME_BYTES`] are rejected outright.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

mod endpoint;

pub use endpoint::{PeerEndpoint, PortLayout};

/// Deadline for a complete request/response exchange with a peer.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(15);

/// Cadence at which collection loops (verification, learn) re-check their
/// deadlines while waiting for further messages.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on a single framed message.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Errors surfaced by the wire transport.
///
/// Callers in the consensus layer fold most of these into "the peer did not
/// answer": an unreachable or silent peer is indistinguishable from one that
/// rejected the request, and is treated as a rejection once the deadline has
/// passed.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The destination refused the connection or the exchange timed out.
    #[error("peer {addr} unreachable: {reason}")]
    Unreachable { addr: String, reason: String },

    /// The connection closed before a complete frame arrived.
    #[error("connection to {0} closed mid-frame")]
    ConnectionClosed(String),

    /// The peer sent more bytes than a frame may carry.
    #[error("frame from {0} exceeds {MAX_FRAME_BYTES} bytes")]
    OversizedFrame(String),

    /// The payload was not valid JSON.
    #[error("malformed message from {addr}: {source}")]
    Malformed {
        addr: String,
        #[source]
        source: serde_json::Error,
    },

    /// A peer URL in the directory could not be parsed into host and port.
    #[error("invalid peer url: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TransportError {
    fn unreachable(addr: &str, err: impl std::fmt::Display) -> Self {
        Self::Unreachable {
            addr: addr.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Serialize `message` and write it as one newline-delimited frame.
async fn write_frame<M: Serialize>(
    stream: &mut TcpStream,
    message: &M,
    addr: &str,
) -> Result<(), TransportError> {
    let mut payload = serde_json::to_vec(message).map_err(|e| TransportError::Malformed {
        addr: addr.to_string(),
        source: e,
    })?;
    payload.push(b'\n');
    stream.write_all(&payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one newline- or EOF-terminated frame and decode it as JSON.
async fn read_frame(
    reader: &mut BufReader<&mut TcpStream>,
    addr: &str,
) -> Result<Value, TransportError> {
    let mut buf = Vec::with_capacity(256);
    let take = (MAX_FRAME_BYTES + 1) as u64;
    let n = {
        let mut limited = reader.take(take);
        limited.read_until(b'\n', &mut buf).await?
    };
    if n == 0 {
        return Err(TransportError::ConnectionClosed(addr.to_string()));
    }
    if buf.len() > MAX_FRAME_BYTES {
        return Err(TransportError::OversizedFrame(addr.to_string()));
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    serde_json::from_slice(&buf).map_err(|e| TransportError::Malformed {
        addr: addr.to_string(),
        source: e,
    })
}

/// Fire-and-forget send: connect, write one frame, close.
///
/// The write half is shut down after the payload so the receiver observes a
/// clean EOF even if it never reads up to the delimiter.
pub async fn send_json<M: Serialize>(addr: &str, message: &M) -> Result<(), TransportError> {
    let exchange = async {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::unreachable(addr, e))?;
        write_frame(&mut stream, message, addr).await?;
        stream.shutdown().await?;
        Ok(())
    };
    tokio::time::timeout(SEND_TIMEOUT, exchange)
        .await
        .map_err(|_| TransportError::unreachable(addr, "send timed out"))?
}

/// Request/response exchange: connect, write one frame, read one frame back.
///
/// The whole exchange is bounded by [`SEND_TIMEOUT`]; expiry is reported as
/// [`TransportError::Unreachable`], which callers treat as a rejection.
pub async fn request_json<M: Serialize>(addr: &str, message: &M) -> Result<Value, TransportError> {
    let exchange = async {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::unreachable(addr, e))?;
        write_frame(&mut stream, message, addr).await?;
        let mut reader = BufReader::new(&mut stream);
        read_frame(&mut reader, addr).await
    };
    tokio::time::timeout(SEND_TIMEOUT, exchange)
        .await
        .map_err(|_| TransportError::unreachable(addr, "request timed out"))?
}

/// Receiver side of one protocol plane.
///
/// Implementations decode the already-parsed JSON value and optionally return
/// a reply to be written on the same connection. Returning `None` closes the
/// connection without an answer (the broadcast planes never reply).
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: Value, peer: SocketAddr) -> Option<Value>;
}

/// A running inbound listener for one protocol plane.
pub struct Listener {
    name: &'static str,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl Listener {
    /// The address the listener actually bound (port 0 resolves here).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections. In-flight connection tasks run to
    /// completion on their own.
    pub fn shutdown(&self) {
        debug!(listener = self.name, "shutting down listener");
        self.accept_task.abort();
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Bind `addr` and serve it with `handler`, one spawned task per accepted
/// connection so a slow peer cannot stall the accept loop.
///
/// Malformed frames are logged and dropped without touching any state, per
/// the protocol's error taxonomy.
pub async fn spawn_listener(
    name: &'static str,
    addr: SocketAddr,
    handler: Arc<dyn MessageHandler>,
) -> Result<Listener, TransportError> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!(listener = name, %local_addr, "listener started");

    let accept_task = tokio::spawn(async move {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(listener = name, error = %e, "accept failed");
                    continue;
                }
            };
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, peer, handler).await {
                    debug!(listener = name, %peer, error = %e, "connection dropped");
                }
            });
        }
    });

    Ok(Listener {
        name,
        local_addr,
        accept_task,
    })
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn MessageHandler>,
) -> Result<(), TransportError> {
    let addr = peer.to_string();
    let message = {
        let mut reader = BufReader::new(&mut stream);
        match tokio::time::timeout(SEND_TIMEOUT, read_frame(&mut reader, &addr)).await {
            Ok(Ok(message)) => message,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(TransportError::unreachable(&addr, "read timed out")),
        }
    };
    if let Some(reply) = handler.handle(message, peer).await {
        write_frame(&mut stream, &reply, &addr).await?;
        stream.shutdown().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl MessageHandler for Echo {
        async fn handle(&self, message: Value, _peer: SocketAddr) -> Option<Value> {
            Some(json!({ "echo": message }))
        }
    }

    struct Silent;

    #[async_trait]
    impl MessageHandler for Silent {
        async fn handle(&self, _message: Value, _peer: SocketAddr) -> Option<Value> {
            None
        }
    }

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_request_reply_round_trip() {
        let listener = spawn_listener("echo", loopback(), Arc::new(Echo)).await.unwrap();
        let addr = listener.local_addr().to_string();

        let reply = request_json(&addr, &json!({"type": "prepare", "proposal_number": 7}))
            .await
            .unwrap();
        assert_eq!(reply["echo"]["proposal_number"], 7);
    }

    #[tokio::test]
    async fn test_fire_and_forget_send() {
        let listener = spawn_listener("sink", loopback(), Arc::new(Silent)).await.unwrap();
        let addr = listener.local_addr().to_string();

        send_json(&addr, &json!({"type": "verify", "status": "approved"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_an_error() {
        // Port 1 on loopback is never listening in the test environment.
        let err = request_json("127.0.0.1:1", &json!({"type": "prepare"}))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_dropped_without_reply() {
        use tokio::io::AsyncReadExt;

        let listener = spawn_listener("echo", loopback(), Arc::new(Echo)).await.unwrap();
        let mut stream = TcpStream::connect(listener.local_addr()).await.unwrap();
        stream.write_all(b"this is not json\n").await.unwrap();
        stream.shutdown().await.unwrap();

        let mut buf = Vec::new();
        let n = stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0, "no reply expected for a malformed frame");
    }

    #[tokio::test]
    async fn test_eof_terminated_frame_is_accepted() {
        let listener = spawn_listener("echo", loopback(), Arc::new(Echo)).await.unwrap();
        let mut stream = TcpStream::connect(listener.local_addr()).await.unwrap();
        // No trailing newline: the sender just closes its write half.
        stream.write_all(b"{\"n\":1}").await.unwrap();
        stream.shutdown().await.unwrap();

        let mut reader = BufReader::new(&mut stream);
        let reply = read_frame(&mut reader, "test").await.unwrap();
        assert_eq!(reply["echo"]["n"], 1);
    }
}
