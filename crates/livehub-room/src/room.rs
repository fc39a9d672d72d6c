//! Room actor: an isolated Tokio task that owns one room.
//!
//! The actor holds the member list and the game state; the outside world
//! talks to it through a bounded channel. Members are added and removed
//! only by the hub, so a broadcast never races a membership change.

use std::collections::HashMap;
use std::sync::Arc;

use livehub_protocol::{
    Codec, Envelope, GameStateUpdate, JsonCodec, MembershipNotice, MessageType, SERVER_SENDER,
};
use livehub_transport::ConnectionId;
use serde_json::Map;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

use crate::{ClientHandle, GameState, RoomConfig, RoomError};

/// Commands sent to a room actor through its channel.
pub(crate) enum RoomCommand {
    /// Add a member. Sent by the hub.
    Join { client: ClientHandle },

    /// Remove a member. Sent by the hub.
    Leave { client_id: ConnectionId },

    /// Forward an envelope to the members.
    Relay { envelope: Envelope },

    /// Apply a member's game-state update and broadcast the result.
    GameState {
        origin: ConnectionId,
        sender: String,
        update: GameStateUpdate,
    },

    /// Request a snapshot of the room's metadata.
    GetInfo { reply: oneshot::Sender<RoomInfo> },

    /// Stop the actor.
    Shutdown,
}

/// A snapshot of room metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub name: String,
    /// Member usernames, sorted.
    pub members: Vec<String>,
    pub game_version: u64,
}

/// Handle to a running room actor.
///
/// Cheap to clone. The hub keeps the authoritative one; connections get
/// clones as their "current room" reference.
#[derive(Clone)]
pub struct RoomHandle {
    name: Arc<str>,
    sender: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` if both handles point at the same actor.
    pub fn same_room(&self, other: &RoomHandle) -> bool {
        self.sender.same_channel(&other.sender)
    }

    /// Adds a member, waiting for queue space.
    pub async fn join(&self, client: ClientHandle) -> Result<(), RoomError> {
        self.send(RoomCommand::Join { client }).await
    }

    /// Removes a member, waiting for queue space.
    pub async fn leave(&self, client_id: ConnectionId) -> Result<(), RoomError> {
        self.send(RoomCommand::Leave { client_id }).await
    }

    /// Submits an envelope for relay without waiting.
    ///
    /// # Errors
    /// [`RoomError::Busy`] if the queue is full, [`RoomError::Unavailable`]
    /// if the room is gone.
    pub fn relay(&self, envelope: Envelope) -> Result<(), RoomError> {
        self.try_send(RoomCommand::Relay { envelope })
    }

    /// Submits a game-state update without waiting. Errors as [`relay`](Self::relay).
    pub fn update_game_state(
        &self,
        origin: ConnectionId,
        sender: impl Into<String>,
        update: GameStateUpdate,
    ) -> Result<(), RoomError> {
        self.try_send(RoomCommand::GameState {
            origin,
            sender: sender.into(),
            update,
        })
    }

    /// Requests the current room info.
    pub async fn get_info(&self) -> Result<RoomInfo, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::GetInfo { reply }).await?;
        rx.await.map_err(|_| self.unavailable())
    }

    /// Tells the room to shut down.
    pub async fn shutdown(&self) -> Result<(), RoomError> {
        self.send(RoomCommand::Shutdown).await
    }

    async fn send(&self, cmd: RoomCommand) -> Result<(), RoomError> {
        self.sender.send(cmd).await.map_err(|_| self.unavailable())
    }

    fn try_send(&self, cmd: RoomCommand) -> Result<(), RoomError> {
        self.sender.try_send(cmd).map_err(|e| match e {
            TrySendError::Full(_) => RoomError::Busy(self.name.to_string()),
            TrySendError::Closed(_) => self.unavailable(),
        })
    }

    fn unavailable(&self) -> RoomError {
        RoomError::Unavailable(self.name.to_string())
    }
}

impl std::fmt::Debug for RoomHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RoomHandle").field(&self.name).finish()
    }
}

/// The internal room actor state. Runs inside a Tokio task.
struct RoomActor {
    name: Arc<str>,
    config: RoomConfig,
    members: HashMap<ConnectionId, ClientHandle>,
    game: GameState,
    receiver: mpsc::Receiver<RoomCommand>,
}

impl RoomActor {
    /// Runs the actor loop until shutdown or until every handle is dropped.
    async fn run(mut self) {
        tracing::info!(room = %self.name, "room actor started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                RoomCommand::Join { client } => self.handle_join(client),
                RoomCommand::Leave { client_id } => self.handle_leave(client_id),
                RoomCommand::Relay { envelope } => self.handle_relay(envelope),
                RoomCommand::GameState {
                    origin,
                    sender,
                    update,
                } => self.handle_game_state(origin, sender, update),
                RoomCommand::GetInfo { reply } => {
                    let _ = reply.send(self.info());
                }
                RoomCommand::Shutdown => break,
            }
        }

        tracing::info!(room = %self.name, "room actor stopped");
    }

    fn handle_join(&mut self, client: ClientHandle) {
        let username = client.username().to_owned();
        self.members.insert(client.id(), client.clone());
        tracing::info!(
            room = %self.name,
            %username,
            members = self.members.len(),
            "member joined"
        );

        self.broadcast_notice(MessageType::JoinRoom, &username, None);
        if self.game.version() > 0 {
            let snapshot = self.game.snapshot(Map::new());
            match Envelope::with_payload(MessageType::GameState, &snapshot, SERVER_SENDER) {
                Ok(envelope) => {
                    client.send_envelope(&envelope);
                }
                Err(e) => tracing::error!(room = %self.name, error = %e, "failed to encode snapshot"),
            }
        }
    }

    fn handle_leave(&mut self, client_id: ConnectionId) {
        let Some(client) = self.members.remove(&client_id) else {
            tracing::debug!(room = %self.name, %client_id, "leave for non-member ignored");
            return;
        };
        tracing::info!(
            room = %self.name,
            username = %client.username(),
            members = self.members.len(),
            "member left"
        );
        self.broadcast_notice(MessageType::LeaveRoom, client.username(), Some(&client));
    }

    fn handle_relay(&self, envelope: Envelope) {
        let Some(origin) = envelope.origin else {
            tracing::warn!(room = %self.name, "relay without origin dropped");
            return;
        };
        if !self.members.contains_key(&origin) {
            tracing::warn!(
                room = %self.name,
                sender = %envelope.sender,
                "relay from non-member, ignoring"
            );
            return;
        }

        let Some(frame) = self.encode(&envelope) else {
            return;
        };
        let echo = self.config.echo_policy.echoes();
        for (id, member) in &self.members {
            if *id == origin && !echo {
                continue;
            }
            member.send(frame.clone());
        }
    }

    fn handle_game_state(&mut self, origin: ConnectionId, sender: String, update: GameStateUpdate) {
        if !self.members.contains_key(&origin) {
            tracing::warn!(room = %self.name, %sender, "game state from non-member, ignoring");
            return;
        }

        self.game.apply(&update);
        tracing::debug!(room = %self.name, %sender, version = self.game.version(), "game state updated");

        let snapshot = self.game.snapshot(update.changes);
        match Envelope::with_payload(MessageType::GameState, &snapshot, sender) {
            Ok(envelope) => self.broadcast(&envelope),
            Err(e) => tracing::error!(room = %self.name, error = %e, "failed to encode game state"),
        }
    }

    /// Tells every member (and `departed`, if given) who joined or left.
    fn broadcast_notice(&self, kind: MessageType, username: &str, departed: Option<&ClientHandle>) {
        let notice = MembershipNotice {
            room_name: self.name.to_string(),
            members: self.usernames(),
        };
        let envelope = match Envelope::with_payload(kind, &notice, username) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(room = %self.name, error = %e, "failed to encode notice");
                return;
            }
        };
        let Some(frame) = self.encode(&envelope) else {
            return;
        };
        for member in self.members.values() {
            member.send(frame.clone());
        }
        if let Some(client) = departed {
            client.send(frame);
        }
    }

    /// Sends an envelope to every member.
    fn broadcast(&self, envelope: &Envelope) {
        if let Some(frame) = self.encode(envelope) {
            for member in self.members.values() {
                member.send(frame.clone());
            }
        }
    }

    fn encode(&self, envelope: &Envelope) -> Option<Arc<str>> {
        match JsonCodec.encode(envelope) {
            Ok(text) => Some(text.into()),
            Err(e) => {
                tracing::error!(room = %self.name, error = %e, "failed to encode envelope");
                None
            }
        }
    }

    fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .members
            .values()
            .map(|m| m.username().to_owned())
            .collect();
        names.sort();
        names
    }

    fn info(&self) -> RoomInfo {
        RoomInfo {
            name: self.name.to_string(),
            members: self.usernames(),
            game_version: self.game.version(),
        }
    }
}

/// Spawns a new room actor task and returns a handle to it.
///
/// `config.command_buffer` bounds the room's queue: the hub waits for
/// space, members' relay traffic is dropped when it's full.
pub fn spawn_room(name: &str, config: RoomConfig) -> RoomHandle {
    let (tx, rx) = mpsc::channel(config.command_buffer.max(1));
    let name: Arc<str> = Arc::from(name);

    let actor = RoomActor {
        name: Arc::clone(&name),
        config,
        members: HashMap::new(),
        game: GameState::new(),
        receiver: rx,
    };

    tokio::spawn(actor.run());

    RoomHandle { name, sender: tx }
}
