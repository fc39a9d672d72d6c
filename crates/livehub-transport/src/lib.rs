//! Transport abstraction layer for livehub.
//!
//! Provides the [`Connection`] trait that the connection actor drives, plus a
//! WebSocket implementation ([`WebSocketListener`], [`WebSocketConnection`]).
//!
//! A connection is used concurrently by several tasks (reader, writer,
//! keepalive), so every method takes `&self` and implementations keep the
//! read and write halves independently locked.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{UpgradeRequest, WebSocketConnection, WebSocketListener, upgrade};

use std::fmt;
use std::future::Future;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A data frame received from the remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A UTF-8 text frame.
    Text(String),
    /// A binary frame.
    Binary(Vec<u8>),
}

impl Frame {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    /// Returns `true` if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Status sent with a close frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000: the purpose of the connection has been fulfilled.
    Normal,
    /// 1001: the server is going down.
    GoingAway,
    /// 1008: the peer violated policy (e.g. failed authentication).
    PolicyViolation,
}

impl CloseCode {
    /// Numeric status code as defined by RFC 6455.
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::PolicyViolation => 1008,
        }
    }
}

/// A single message-oriented connection.
///
/// Futures are required to be `Send` so connection loops can be spawned
/// onto the multi-threaded runtime.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends a text frame to the remote peer.
    fn send_text(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next data frame from the remote peer.
    ///
    /// Control frames are handled internally. Returns `Ok(None)` when the
    /// peer closed the connection.
    fn recv(&self) -> impl Future<Output = Result<Option<Frame>, Self::Error>> + Send;

    /// Sends a ping and resolves once the matching pong has been received.
    ///
    /// Pongs are observed by whichever task is currently inside
    /// [`recv`](Self::recv), so a ping only completes while the connection
    /// is being read. Callers bound this with a timeout.
    fn ping(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Sends a close frame with the given status and shuts the write side.
    fn close(
        &self,
        code: CloseCode,
        reason: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
