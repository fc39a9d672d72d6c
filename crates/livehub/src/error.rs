//! Unified error type for livehub.

use livehub_protocol::ProtocolError;
use livehub_room::RoomError;
use livehub_session::SessionError;
use livehub_transport::TransportError;

use crate::ConfigError;

/// Errors from talking to the hub dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The dispatcher has stopped; no further commands are accepted.
    #[error("hub is shut down")]
    Closed,
}

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum LivehubError {
    /// A transport-level error (bind, accept, upgrade, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid payload).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Authentication failed or no credentials were presented.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A room-level error (busy, unavailable).
    #[error(transparent)]
    Room(#[from] RoomError),

    /// The hub dispatcher is gone.
    #[error(transparent)]
    Hub(#[from] HubError),

    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
