//! Wire protocol for livehub.
//!
//! - **Types** ([`Envelope`], [`MessageType`], payload structs): what
//!   travels on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how it becomes text frames.
//! - **Errors** ([`ProtocolError`]): what can go wrong decoding it.
//!
//! ```text
//! Transport (text frames) → Protocol (Envelope) → Hub / Room
//! ```

mod codec;
mod error;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use types::{
    Envelope, ErrorCode, ErrorPayload, GameStateSnapshot, GameStateUpdate, JoinRoomPayload,
    MembershipNotice, MessageType, SERVER_SENDER,
};
