//! Error types for the protocol layer.

use crate::{ErrorCode, MessageType};

/// Errors that can occur while encoding or decoding hub traffic.
///
/// None of these are fatal to a connection: the connection actor turns
/// them into an `error` envelope via [`ProtocolError::code`].
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// The frame is not a valid envelope (malformed JSON, missing `type`).
    #[error("invalid message format: {0}")]
    Decode(#[source] serde_json::Error),

    /// The envelope's `type` is not one the server understands.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// The type exists but only flows server → client.
    #[error("message type {0} cannot be sent by clients")]
    ServerOnly(MessageType),

    /// The payload doesn't match the contract for its message type.
    #[error("invalid payload format: {0}")]
    InvalidPayload(String),
}

impl ProtocolError {
    /// Maps this error to the code reported to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Encode(_) => ErrorCode::Internal,
            Self::Decode(_) => ErrorCode::InvalidMessage,
            Self::UnknownType(_) => ErrorCode::UnknownType,
            Self::ServerOnly(_) => ErrorCode::InvalidMessage,
            Self::InvalidPayload(_) => ErrorCode::InvalidPayload,
        }
    }
}
