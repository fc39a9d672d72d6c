//! Wire types exchanged between clients and the hub.
//!
//! Every frame is a JSON envelope:
//!
//! ```text
//! { "type": "chat", "payload": <type-specific>, "sender": "alice" }
//! ```
//!
//! `sender` is always overwritten by the server when a frame is decoded,
//! so clients can't impersonate one another. `payload` is kept as the raw
//! JSON text the client sent; only `join-room` and `game-state` payloads
//! are ever parsed.

use std::fmt;
use std::str::FromStr;

use livehub_transport::ConnectionId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{Map, Value};

use crate::{Codec, ProtocolError};

/// Sender stamped on envelopes that originate from the server itself.
pub const SERVER_SENDER: &str = "";

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// The closed set of envelope types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    /// Chat text, relayed verbatim to the room.
    Chat,
    /// Video call signaling, relayed verbatim to the room.
    VideoSignal,
    /// Arbitrary peer signaling, relayed verbatim to the room.
    RawSignal,
    /// Update to (client → server) or snapshot of (server → client) the
    /// room's shared game state.
    GameState,
    /// Request to join a room; also used to announce a new member.
    JoinRoom,
    /// Request to leave the current room; also used to announce a departure.
    LeaveRoom,
    /// Server → client only.
    Error,
}

impl MessageType {
    /// The wire name of this type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::VideoSignal => "video-signal",
            Self::RawSignal => "raw-signal",
            Self::GameState => "game-state",
            Self::JoinRoom => "join-room",
            Self::LeaveRoom => "leave-room",
            Self::Error => "error",
        }
    }

    /// Returns `true` for types the room forwards without interpreting.
    pub fn is_relay(self) -> bool {
        matches!(self, Self::Chat | Self::VideoSignal | Self::RawSignal)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "video-signal" => Ok(Self::VideoSignal),
            "raw-signal" => Ok(Self::RawSignal),
            "game-state" => Ok(Self::GameState),
            "join-room" => Ok(Self::JoinRoom),
            "leave-room" => Ok(Self::LeaveRoom),
            "error" => Ok(Self::Error),
            other => Err(ProtocolError::UnknownType(other.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The top-level message wrapper. Every frame on the wire is an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// What kind of message this is.
    #[serde(rename = "type")]
    pub kind: MessageType,

    /// Type-specific content, byte-for-byte as received. A missing payload
    /// is `null`.
    #[serde(default)]
    pub payload: Box<RawValue>,

    /// Username of the originating client, stamped by the server.
    #[serde(default)]
    pub sender: String,

    /// The connection this envelope arrived on. Never serialized.
    #[serde(skip)]
    pub origin: Option<ConnectionId>,
}

/// What a client is allowed to put on the wire. Unknown fields (including
/// any client-supplied `sender`) are ignored.
#[derive(Deserialize)]
struct Inbound {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Box<RawValue>,
}

impl Envelope {
    /// Creates a server-side envelope around an already-encoded payload.
    pub fn new(kind: MessageType, payload: Box<RawValue>, sender: impl Into<String>) -> Self {
        Self {
            kind,
            payload,
            sender: sender.into(),
            origin: None,
        }
    }

    /// Creates a server-side envelope, serializing `payload`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if `payload` can't be serialized.
    pub fn with_payload<T: Serialize + ?Sized>(
        kind: MessageType,
        payload: &T,
        sender: impl Into<String>,
    ) -> Result<Self, ProtocolError> {
        let raw = serde_json::value::to_raw_value(payload).map_err(ProtocolError::Encode)?;
        Ok(Self::new(kind, raw, sender))
    }

    /// Creates an `error` envelope addressed from the server.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        let payload = ErrorPayload {
            code,
            message: message.into(),
        };
        Self::new(
            MessageType::Error,
            serde_json::value::to_raw_value(&payload).unwrap_or_default(),
            SERVER_SENDER,
        )
    }

    /// Decodes a frame received from a client.
    ///
    /// The envelope's `sender` is set to `sender` and its origin to
    /// `origin`, whatever the frame contained.
    ///
    /// # Errors
    /// - [`ProtocolError::Decode`]: not a JSON object with a string `type`
    /// - [`ProtocolError::UnknownType`]: `type` isn't a known message type
    /// - [`ProtocolError::ServerOnly`]: the client sent an `error` envelope
    pub fn decode_inbound(
        codec: &impl Codec,
        text: &str,
        sender: &str,
        origin: ConnectionId,
    ) -> Result<Self, ProtocolError> {
        let inbound: Inbound = codec.decode(text)?;
        let kind: MessageType = inbound.kind.parse()?;
        if kind == MessageType::Error {
            return Err(ProtocolError::ServerOnly(kind));
        }
        Ok(Self {
            kind,
            payload: inbound.payload,
            sender: sender.to_owned(),
            origin: Some(origin),
        })
    }

    /// Interprets the payload as `T`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidPayload`] if the payload doesn't fit.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_str(self.payload.get())
            .map_err(|e| ProtocolError::InvalidPayload(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Payload of a client's `join-room` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomPayload {
    pub room_name: String,
}

impl JoinRoomPayload {
    /// Extracts and validates the payload of a `join-room` envelope.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidPayload`] if `roomName` is missing,
    /// not a string, or empty.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, ProtocolError> {
        let payload: Self = envelope.payload_as()?;
        if payload.room_name.is_empty() {
            return Err(ProtocolError::InvalidPayload("missing roomName".into()));
        }
        Ok(payload)
    }
}

/// Payload of the `join-room` / `leave-room` notices a room sends its
/// members when membership changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipNotice {
    pub room_name: String,
    /// Usernames of the members after the change, sorted.
    pub members: Vec<String>,
}

/// A client's change to the room's shared game state.
///
/// `changes` is merged shallowly into the state object; a `null` value
/// removes the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStateUpdate {
    pub changes: Map<String, Value>,
}

/// The room's game state as broadcast after every applied update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStateSnapshot {
    /// Number of updates applied so far.
    pub version: u64,
    /// The full state after the update.
    pub state: Map<String, Value>,
    /// The update that produced this version (empty for join snapshots).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub changes: Map<String, Value>,
}

/// Machine-readable reason carried by an `error` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    /// Non-text frame.
    InvalidFrame,
    /// Frame larger than the configured maximum.
    MessageTooLarge,
    /// The connection's inbound queue was full; the frame was dropped.
    ServerBusy,
    /// Not a valid envelope.
    InvalidMessage,
    /// Unrecognized `type`.
    UnknownType,
    /// Payload doesn't match its type's contract.
    InvalidPayload,
    /// Room-scoped message sent while not in a room.
    NotInRoom,
    /// The room's queue was full; the message was dropped.
    RoomBusy,
    /// Something went wrong on the server.
    Internal,
}

/// Payload of an `error` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

// =========================================================================
// Tests
// =========================================================================
