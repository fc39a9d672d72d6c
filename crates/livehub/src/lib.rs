//! # livehub
//!
//! Real-time WebSocket hub: persistent connections grouped into named
//! rooms, with chat, signaling and shared game state relayed among room
//! members.
//!
//! Every admitted connection runs as an actor with four loops (read,
//! write, keepalive, process). A single [`Hub`] dispatcher owns the
//! registries of connections and rooms, and every room is its own task.
//! All data-plane queues are bounded: when one fills up the message is
//! dropped and the sender gets an `error` envelope, so one slow peer can't
//! stall anyone else.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use livehub::prelude::*;
//!
//! struct GuestAuth;
//!
//! impl Authenticator for GuestAuth {
//!     async fn authenticate(&self, credentials: &Credentials) -> Result<Identity, SessionError> {
//!         let name = credentials.require_token()?;
//!         Ok(Identity::new(name, name, AccountType::Guest))
//!     }
//! }
//!
//! # async fn run() -> Result<(), LivehubError> {
//! let server = LivehubServer::<GuestAuth>::builder()
//!     .bind("0.0.0.0:8080")
//!     .config(HubConfig::from_env()?)
//!     .build(GuestAuth)
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod connection;
mod error;
mod hub;
mod server;

pub use config::{ConfigError, HubConfig};
pub use error::{HubError, LivehubError};
pub use hub::{Hub, HubHandle, HubSnapshot};
pub use server::{LivehubServer, LivehubServerBuilder};

pub use livehub_protocol as protocol;
pub use livehub_room as room;
pub use livehub_session as session;
pub use livehub_transport as transport;

/// Everything needed to run a server and write an authenticator.
pub mod prelude {
    pub use crate::{
        ConfigError, Hub, HubConfig, HubError, HubHandle, HubSnapshot, LivehubError,
        LivehubServer, LivehubServerBuilder,
    };
    pub use livehub_protocol::{Envelope, ErrorCode, MessageType, ProtocolError};
    pub use livehub_room::{EchoPolicy, RoomError};
    pub use livehub_session::{AccountType, Authenticator, Credentials, Identity, SessionError};
    pub use livehub_transport::TransportError;
}
