//! The hub: the single dispatcher that owns the connection and room
//! registries.
//!
//! Every structural change (a connection registering, joining a room,
//! leaving, going away) is a command on one bounded queue, processed one
//! at a time by one task. Nothing else mutates the registries, so no locks
//! are needed and membership changes are totally ordered.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use livehub_room::{ClientHandle, RoomHandle, spawn_room};
use livehub_session::Identity;
use livehub_transport::{Connection, ConnectionId, TransportError};
use tokio::sync::{mpsc, oneshot};

use crate::connection;
use crate::{HubConfig, HubError};

pub(crate) enum HubCommand {
    Register {
        client: ClientHandle,
        ack: oneshot::Sender<()>,
    },
    Unregister {
        client_id: ConnectionId,
        username: String,
    },
    Join {
        client: ClientHandle,
        room_name: String,
        ack: oneshot::Sender<()>,
    },
    Leave {
        client: ClientHandle,
        ack: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<HubSnapshot>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Point-in-time view of the hub's registries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubSnapshot {
    /// Registered usernames, sorted.
    pub clients: Vec<String>,
    /// Room name to sorted member usernames.
    pub rooms: BTreeMap<String, Vec<String>>,
}

/// Handle to a running hub.
///
/// Cheap to clone; every connection actor holds one. The hub stops when
/// [`shutdown`](Self::shutdown) is called or every handle is dropped.
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubCommand>,
    config: Arc<HubConfig>,
}

impl HubHandle {
    /// The configuration the hub was spawned with.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Admits an authenticated connection.
    ///
    /// Registers the caller (displacing any existing connection with the
    /// same username) and starts the connection's actor loops. Returns once
    /// the registration has been processed.
    pub async fn admit<C>(&self, conn: C, identity: Identity) -> Result<ClientHandle, HubError>
    where
        C: Connection<Error = TransportError>,
    {
        connection::spawn(conn, identity, self.clone()).await
    }

    /// Registers a client under its username.
    pub async fn register(&self, client: ClientHandle) -> Result<(), HubError> {
        let (ack, rx) = oneshot::channel();
        self.send(HubCommand::Register { client, ack }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Removes a client from the registry and from its room.
    ///
    /// Ignored if `username` is now held by a different connection.
    pub async fn unregister(&self, client_id: ConnectionId, username: &str) -> Result<(), HubError> {
        self.send(HubCommand::Unregister {
            client_id,
            username: username.to_owned(),
        })
        .await
    }

    /// Moves a client into `room_name`, leaving its current room first.
    pub async fn join(&self, client: ClientHandle, room_name: &str) -> Result<(), HubError> {
        let (ack, rx) = oneshot::channel();
        self.send(HubCommand::Join {
            client,
            room_name: room_name.to_owned(),
            ack,
        })
        .await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Takes a client out of its current room, if any.
    pub async fn leave(&self, client: ClientHandle) -> Result<(), HubError> {
        let (ack, rx) = oneshot::channel();
        self.send(HubCommand::Leave { client, ack }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Returns the registered clients and every room's members.
    pub async fn snapshot(&self) -> Result<HubSnapshot, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Disconnects every client, stops every room and ends the dispatcher.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        let (ack, rx) = oneshot::channel();
        self.send(HubCommand::Shutdown { ack }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn send(&self, cmd: HubCommand) -> Result<(), HubError> {
        self.sender.send(cmd).await.map_err(|_| HubError::Closed)
    }
}

impl std::fmt::Debug for HubHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct ClientEntry {
    handle: ClientHandle,
    room: Option<String>,
}

struct RoomEntry {
    handle: RoomHandle,
    members: HashMap<ConnectionId, String>,
}

/// The hub dispatcher.
pub struct Hub {
    config: Arc<HubConfig>,
    clients: HashMap<String, ClientEntry>,
    rooms: HashMap<String, RoomEntry>,
    receiver: mpsc::Receiver<HubCommand>,
}

impl Hub {
    /// Starts a hub dispatcher task and returns a handle to it.
    pub fn spawn(config: HubConfig) -> HubHandle {
        let (tx, rx) = mpsc::channel(config.command_buffer.max(1));
        let config = Arc::new(config);

        let hub = Hub {
            config: Arc::clone(&config),
            clients: HashMap::new(),
            rooms: HashMap::new(),
            receiver: rx,
        };
        tokio::spawn(hub.run());

        HubHandle { sender: tx, config }
    }

    async fn run(mut self) {
        tracing::info!("hub started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                HubCommand::Register { client, ack } => {
                    self.register(client).await;
                    let _ = ack.send(());
                }
                HubCommand::Unregister {
                    client_id,
                    username,
                } => self.unregister(client_id, &username).await,
                HubCommand::Join {
                    client,
                    room_name,
                    ack,
                } => {
                    self.join(client, room_name).await;
                    let _ = ack.send(());
                }
                HubCommand::Leave { client, ack } => {
                    self.leave(client).await;
                    let _ = ack.send(());
                }
                HubCommand::Snapshot { reply } => {
                    let _ = reply.send(self.snapshot());
                }
                HubCommand::Shutdown { ack } => {
                    self.shutdown().await;
                    let _ = ack.send(());
                    break;
                }
            }
        }

        tracing::info!("hub stopped");
    }

    async fn register(&mut self, client: ClientHandle) {
        let username = client.username().to_owned();

        // Last login wins.
        if let Some(previous) = self.clients.remove(&username) {
            tracing::warn!(
                %username,
                old = %previous.handle.id(),
                new = %client.id(),
                "displacing existing connection"
            );
            if let Some(room) = previous.room {
                previous.handle.set_room(None);
                self.remove_member(&room, previous.handle.id()).await;
            }
            previous.handle.disconnect();
        }

        tracing::info!(conn_id = %client.id(), %username, "client registered");
        self.clients.insert(
            username,
            ClientEntry {
                handle: client,
                room: None,
            },
        );
    }

    async fn unregister(&mut self, client_id: ConnectionId, username: &str) {
        if !self.is_current(username, client_id) {
            tracing::debug!(conn_id = %client_id, %username, "stale unregister ignored");
            return;
        }
        if let Some(entry) = self.clients.remove(username) {
            if let Some(room) = entry.room {
                entry.handle.set_room(None);
                self.remove_member(&room, client_id).await;
            }
            tracing::info!(conn_id = %client_id, %username, "client unregistered");
        }
    }

    async fn join(&mut self, client: ClientHandle, room_name: String) {
        if !self.is_current(client.username(), client.id()) {
            tracing::debug!(conn_id = %client.id(), "join from unregistered connection ignored");
            return;
        }
        let current = self
            .clients
            .get(client.username())
            .and_then(|e| e.room.as_deref());
        if current == Some(room_name.as_str()) {
            tracing::debug!(username = %client.username(), room = %room_name, "already in room");
            return;
        }

        self.detach(&client).await;

        let room_config = self.config.room_config();
        let room = self.rooms.entry(room_name.clone()).or_insert_with(|| {
            tracing::info!(room = %room_name, "room created");
            RoomEntry {
                handle: spawn_room(&room_name, room_config),
                members: HashMap::new(),
            }
        });
        room.members
            .insert(client.id(), client.username().to_owned());
        let handle = room.handle.clone();

        if let Err(e) = handle.join(client.clone()).await {
            tracing::error!(room = %room_name, error = %e, "room rejected join");
            self.discard_room(&room_name).await;
            return;
        }

        client.set_room(Some(handle));
        if let Some(entry) = self.clients.get_mut(client.username()) {
            entry.room = Some(room_name);
        }
    }

    async fn leave(&mut self, client: ClientHandle) {
        if !self.is_current(client.username(), client.id()) {
            return;
        }
        if !self.detach(&client).await {
            tracing::debug!(username = %client.username(), "leave while not in a room");
        }
    }

    /// Takes `client` out of its current room. Returns `false` if it
    /// wasn't in one.
    async fn detach(&mut self, client: &ClientHandle) -> bool {
        let Some(room) = self
            .clients
            .get_mut(client.username())
            .and_then(|e| e.room.take())
        else {
            return false;
        };
        client.set_room(None);
        self.remove_member(&room, client.id()).await;
        true
    }

    /// Removes a member from a room and discards the room once empty.
    async fn remove_member(&mut self, room_name: &str, client_id: ConnectionId) {
        let Some(room) = self.rooms.get_mut(room_name) else {
            return;
        };
        room.members.remove(&client_id);
        if let Err(e) = room.handle.leave(client_id).await {
            tracing::debug!(room = %room_name, error = %e, "leave not delivered");
        }

        if room.members.is_empty() {
            if let Some(room) = self.rooms.remove(room_name) {
                let _ = room.handle.shutdown().await;
                tracing::info!(room = %room_name, "room discarded");
            }
        }
    }

    /// Drops a room whose actor can no longer be reached, detaching every
    /// member still recorded in it.
    async fn discard_room(&mut self, room_name: &str) {
        let Some(room) = self.rooms.remove(room_name) else {
            return;
        };
        for (id, username) in &room.members {
            if let Some(entry) = self.clients.get_mut(username) {
                if entry.handle.id() == *id && entry.room.as_deref() == Some(room_name) {
                    entry.room = None;
                    entry.handle.set_room(None);
                }
            }
        }
        let _ = room.handle.shutdown().await;
        tracing::warn!(room = %room_name, members = room.members.len(), "room discarded after failure");
    }

    fn is_current(&self, username: &str, client_id: ConnectionId) -> bool {
        self.clients
            .get(username)
            .is_some_and(|e| e.handle.id() == client_id)
    }

    fn snapshot(&self) -> HubSnapshot {
        let mut clients: Vec<String> = self.clients.keys().cloned().collect();
        clients.sort();
        let rooms = self
            .rooms
            .iter()
            .map(|(name, room)| {
                let mut members: Vec<String> = room.members.values().cloned().collect();
                members.sort();
                (name.clone(), members)
            })
            .collect();
        HubSnapshot { clients, rooms }
    }

    async fn shutdown(&mut self) {
        tracing::info!(
            clients = self.clients.len(),
            rooms = self.rooms.len(),
            "hub shutting down"
        );
        for (_, entry) in self.clients.drain() {
            entry.handle.set_room(None);
            entry.handle.disconnect();
        }
        for (_, room) in self.rooms.drain() {
            let _ = room.handle.shutdown().await;
        }
    }
}
