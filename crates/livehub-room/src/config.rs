//! Room configuration.

use serde::{Deserialize, Serialize};

/// Whether a relayed message is delivered back to its sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EchoPolicy {
    /// Everyone in the room except the sender receives the message.
    #[default]
    ExcludeSender,
    /// Every member, the sender included, receives the message.
    IncludeSender,
}

impl EchoPolicy {
    /// Returns `true` if the sender gets its own relayed messages back.
    pub fn echoes(self) -> bool {
        matches!(self, Self::IncludeSender)
    }
}

/// Configuration shared by every room a hub creates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Capacity of each room's command queue. Relay and game-state
    /// messages that find it full are dropped and the sender is told.
    pub command_buffer: usize,

    /// Echo behaviour for relay types.
    pub echo_policy: EchoPolicy,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            command_buffer: 256,
            echo_policy: EchoPolicy::default(),
        }
    }
}
