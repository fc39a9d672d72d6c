//! The room's shared game state.

use livehub_protocol::{GameStateSnapshot, GameStateUpdate};
use serde_json::{Map, Value};

/// A versioned JSON object owned by a single room actor.
///
/// Only the room's own task touches it, so updates from different members
/// are applied one at a time in the order the room receives them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameState {
    version: u64,
    values: Map<String, Value>,
}

impl GameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `update` into the state and bumps the version.
    ///
    /// Keys set to `null` are removed; all other keys are replaced wholesale.
    pub fn apply(&mut self, update: &GameStateUpdate) {
        for (key, value) in &update.changes {
            if value.is_null() {
                self.values.remove(key);
            } else {
                self.values.insert(key.clone(), value.clone());
            }
        }
        self.version += 1;
    }

    /// Number of updates applied so far. Zero means untouched.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Builds the payload broadcast to members.
    pub fn snapshot(&self, changes: Map<String, Value>) -> GameStateSnapshot {
        GameStateSnapshot {
            version: self.version,
            state: self.values.clone(),
            changes,
        }
    }
}
