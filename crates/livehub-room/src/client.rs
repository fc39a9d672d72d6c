//! Handle to a connection actor, held by the hub and by rooms.

use std::sync::Arc;

use livehub_protocol::{Codec, Envelope, ErrorCode, JsonCodec};
use livehub_session::Identity;
use livehub_transport::ConnectionId;
use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::RoomHandle;

/// An encoded text frame waiting in a connection's outbound queue.
///
/// Broadcasts encode once and share the frame between members.
pub type Outbound = Arc<str>;

/// Non-owning handle to a live connection.
///
/// Cloning is cheap. The handle doesn't keep the connection alive: once
/// the actor tears down, sends are silently dropped.
#[derive(Clone)]
pub struct ClientHandle {
    id: ConnectionId,
    identity: Arc<Identity>,
    outbound: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    room: Arc<watch::Sender<Option<RoomHandle>>>,
}

impl ClientHandle {
    /// Creates a handle around a connection's outbound queue and
    /// cancellation token.
    ///
    /// The returned receiver observes the connection's current room as set
    /// by the hub through [`set_room`](Self::set_room).
    pub fn new(
        id: ConnectionId,
        identity: Identity,
        outbound: mpsc::Sender<Outbound>,
        cancel: CancellationToken,
    ) -> (Self, watch::Receiver<Option<RoomHandle>>) {
        let (room, room_rx) = watch::channel(None);
        let handle = Self {
            id,
            identity: Arc::new(identity),
            outbound,
            cancel,
            room: Arc::new(room),
        };
        (handle, room_rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn username(&self) -> &str {
        &self.identity.username
    }

    /// Queues a frame for the connection without waiting.
    ///
    /// Returns `false` if the frame was dropped because the queue is full
    /// or the connection is gone.
    pub fn send(&self, frame: Outbound) -> bool {
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    conn_id = %self.id,
                    username = %self.identity.username,
                    "client send queue full, dropping message"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(conn_id = %self.id, "send to closed connection dropped");
                false
            }
        }
    }

    /// Encodes and queues an envelope. See [`send`](Self::send).
    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        match JsonCodec.encode(envelope) {
            Ok(text) => self.send(text.into()),
            Err(e) => {
                tracing::error!(conn_id = %self.id, error = %e, "failed to encode envelope");
                false
            }
        }
    }

    /// Queues an `error` envelope for the connection.
    pub fn send_error(&self, code: ErrorCode, message: impl Into<String>) -> bool {
        self.send_envelope(&Envelope::error(code, message))
    }

    /// Points the connection at a room, or at none. Hub only.
    pub fn set_room(&self, room: Option<RoomHandle>) {
        self.room.send_replace(room);
    }

    /// The room the hub last assigned to this connection.
    pub fn current_room(&self) -> Option<RoomHandle> {
        self.room.borrow().clone()
    }

    /// Fires the connection's cancellation signal, which tears it down.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    pub fn is_disconnected(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("username", &self.identity.username)
            .finish()
    }
}
