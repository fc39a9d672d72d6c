//! Rooms for livehub.
//!
//! Each room runs as an isolated Tokio task (actor model) that owns its
//! member list and its shared game state. Membership changes only arrive
//! from the hub; relay and game-state traffic arrives from members'
//! connection actors and is never allowed to block them.
//!
//! # Key types
//!
//! - [`ClientHandle`]: the one way anything talks to a connection
//! - [`RoomHandle`]: send commands to a running room actor
//! - [`GameState`]: the versioned shared state object
//! - [`RoomConfig`] / [`EchoPolicy`]: queue size and relay echo behaviour

mod client;
mod config;
mod error;
mod room;
mod state;

pub use client::{ClientHandle, Outbound};
pub use config::{EchoPolicy, RoomConfig};
pub use error::RoomError;
pub use room::{RoomHandle, RoomInfo, spawn_room};
pub use state::GameState;
