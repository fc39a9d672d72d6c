//! Connection actor: the four loops that drive one admitted connection.
//!
//! ```text
//!            ┌────────────┐  inbound   ┌──────────────┐
//! transport ─▶ read loop  ├───queue───▶ process loop ├─▶ hub / room
//!            └────────────┘            └──────────────┘
//!            ┌────────────┐  outbound
//! transport ◀─ write loop ◀──queue──── ClientHandle::send (hub, rooms)
//!            └────────────┘
//!            ┌────────────────┐
//! transport ◀─ keepalive loop │ ping/pong
//!            └────────────────┘
//! ```
//!
//! All four share one cancellation token. Any loop failing cancels it;
//! the read loop then runs teardown exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use livehub_protocol::{
    Envelope, ErrorCode, GameStateUpdate, JoinRoomPayload, JsonCodec, MessageType, ProtocolError,
};
use livehub_room::{ClientHandle, RoomError, RoomHandle};
use livehub_session::Identity;
use livehub_transport::{CloseCode, Connection, Frame, TransportError};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{HubConfig, HubError, HubHandle};

/// Builds a connection actor, registers it with the hub and starts its loops.
pub(crate) async fn spawn<C>(
    conn: C,
    identity: Identity,
    hub: HubHandle,
) -> Result<ClientHandle, HubError>
where
    C: Connection<Error = TransportError>,
{
    let config = hub.config().clone();
    let cancel = CancellationToken::new();
    let (outbound_tx, outbound_rx) = mpsc::channel(config.send_buffer.max(1));
    let (inbound_tx, inbound_rx) = mpsc::channel(config.recv_buffer.max(1));
    let (client, room_rx) = ClientHandle::new(conn.id(), identity, outbound_tx, cancel.clone());

    if let Err(e) = hub.register(client.clone()).await {
        let _ = conn.close(CloseCode::GoingAway, "server shutting down").await;
        return Err(e);
    }

    let actor = Arc::new(ConnectionActor {
        conn,
        client: client.clone(),
        hub,
        config,
        cancel,
        torn_down: AtomicBool::new(false),
    });

    tokio::spawn(read_loop(Arc::clone(&actor), inbound_tx));
    tokio::spawn(write_loop(Arc::clone(&actor), outbound_rx));
    tokio::spawn(keepalive_loop(Arc::clone(&actor)));
    tokio::spawn(process_loop(actor, inbound_rx, room_rx));

    Ok(client)
}

struct ConnectionActor<C> {
    conn: C,
    client: ClientHandle,
    hub: HubHandle,
    config: HubConfig,
    cancel: CancellationToken,
    torn_down: AtomicBool,
}

impl<C> ConnectionActor<C>
where
    C: Connection<Error = TransportError>,
{
    /// Cancels the loops, closes the transport and unregisters. Runs once.
    async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let conn_id = self.client.id();
        let username = self.client.username();
        self.cancel.cancel();

        match tokio::time::timeout(
            self.config.write_timeout,
            self.conn.close(CloseCode::Normal, ""),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(%conn_id, error = %e, "close failed"),
            Err(_) => tracing::debug!(%conn_id, "close timed out"),
        }

        if let Err(e) = self.hub.unregister(conn_id, username).await {
            tracing::debug!(%conn_id, error = %e, "unregister not delivered");
        }
        tracing::info!(%conn_id, %username, "connection closed");
    }

    /// Decodes one inbound frame and routes it.
    async fn process(&self, text: &str, room: &watch::Receiver<Option<RoomHandle>>) {
        let conn_id = self.client.id();
        let envelope =
            match Envelope::decode_inbound(&JsonCodec, text, self.client.username(), conn_id) {
                Ok(envelope) => envelope,
                Err(e) => {
                    if matches!(e, ProtocolError::UnknownType(_)) {
                        tracing::warn!(%conn_id, error = %e, "unknown message type");
                    } else {
                        tracing::debug!(%conn_id, error = %e, "invalid message");
                    }
                    self.client.send_error(e.code(), e.to_string());
                    return;
                }
            };

        match envelope.kind {
            MessageType::Chat | MessageType::VideoSignal | MessageType::RawSignal => {
                let Some(room) = self.current_room(room) else {
                    return;
                };
                let result = room.relay(envelope);
                self.report_room_error(result);
            }
            MessageType::GameState => {
                let update: GameStateUpdate = match envelope.payload_as() {
                    Ok(update) => update,
                    Err(e) => {
                        self.client.send_error(e.code(), e.to_string());
                        return;
                    }
                };
                let Some(room) = self.current_room(room) else {
                    return;
                };
                let result = room.update_game_state(conn_id, envelope.sender, update);
                self.report_room_error(result);
            }
            MessageType::JoinRoom => {
                let payload = match JoinRoomPayload::from_envelope(&envelope) {
                    Ok(payload) => payload,
                    Err(e) => {
                        self.client.send_error(e.code(), e.to_string());
                        return;
                    }
                };
                // Awaited so later frames see the new room.
                let result = self.hub.join(self.client.clone(), &payload.room_name).await;
                self.check_hub(result);
            }
            MessageType::LeaveRoom => {
                let result = self.hub.leave(self.client.clone()).await;
                self.check_hub(result);
            }
            // Rejected by decode_inbound.
            MessageType::Error => {}
        }
    }

    fn current_room(&self, room: &watch::Receiver<Option<RoomHandle>>) -> Option<RoomHandle> {
        let current = room.borrow().clone();
        if current.is_none() {
            self.client
                .send_error(ErrorCode::NotInRoom, "join a room before sending to it");
        }
        current
    }

    fn report_room_error(&self, result: Result<(), RoomError>) {
        match result {
            Ok(()) => {}
            Err(RoomError::Busy(room)) => {
                tracing::warn!(conn_id = %self.client.id(), %room, "room queue full, dropping message");
                self.client
                    .send_error(ErrorCode::RoomBusy, "room is busy, message dropped");
            }
            Err(RoomError::Unavailable(room)) => {
                tracing::debug!(conn_id = %self.client.id(), %room, "room gone");
                self.client
                    .send_error(ErrorCode::NotInRoom, "room is no longer available");
            }
        }
    }

    fn check_hub(&self, result: Result<(), HubError>) {
        if let Err(e) = result {
            tracing::warn!(conn_id = %self.client.id(), error = %e, "hub unavailable, closing");
            self.cancel.cancel();
        }
    }
}

/// Reads frames from the transport and queues them for processing.
async fn read_loop<C>(actor: Arc<ConnectionActor<C>>, inbound: mpsc::Sender<String>)
where
    C: Connection<Error = TransportError>,
{
    let conn_id = actor.client.id();
    let max = actor.config.max_message_size;

    loop {
        let received = tokio::select! {
            _ = actor.cancel.cancelled() => break,
            received = actor.conn.recv() => received,
        };

        match received {
            Ok(Some(Frame::Text(text))) => {
                if text.len() > max {
                    tracing::debug!(%conn_id, len = text.len(), "frame too large");
                    actor.client.send_error(
                        ErrorCode::MessageTooLarge,
                        format!("message exceeds {max} bytes"),
                    );
                    continue;
                }
                match inbound.try_send(text) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(%conn_id, "inbound queue full, dropping frame");
                        actor
                            .client
                            .send_error(ErrorCode::ServerBusy, "server busy, message dropped");
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
            Ok(Some(Frame::Binary(_))) => {
                actor
                    .client
                    .send_error(ErrorCode::InvalidFrame, "only text frames are accepted");
            }
            Ok(None) => {
                tracing::debug!(%conn_id, "peer closed connection");
                break;
            }
            Err(e) if e.is_closed() => {
                tracing::debug!(%conn_id, error = %e, "connection lost");
                break;
            }
            Err(e) => {
                tracing::error!(%conn_id, error = %e, "read failed");
                break;
            }
        }
    }

    drop(inbound);
    actor.teardown().await;
}

/// Flushes the outbound queue to the transport.
async fn write_loop<C>(actor: Arc<ConnectionActor<C>>, mut outbound: mpsc::Receiver<Arc<str>>)
where
    C: Connection<Error = TransportError>,
{
    let conn_id = actor.client.id();

    loop {
        let frame = tokio::select! {
            _ = actor.cancel.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        match tokio::time::timeout(actor.config.write_timeout, actor.conn.send_text(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(%conn_id, error = %e, "write failed");
                actor.cancel.cancel();
                break;
            }
            Err(_) => {
                tracing::warn!(%conn_id, "write timed out");
                actor.cancel.cancel();
                break;
            }
        }
    }
}

/// Pings the peer on a fixed interval. A missed pong kills the connection.
async fn keepalive_loop<C>(actor: Arc<ConnectionActor<C>>)
where
    C: Connection<Error = TransportError>,
{
    let conn_id = actor.client.id();
    let period = actor.config.keepalive_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = actor.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            _ = actor.cancel.cancelled() => break,
            result = tokio::time::timeout(actor.config.keepalive_timeout, actor.conn.ping()) => result,
        };
        match result {
            Ok(Ok(())) => tracing::trace!(%conn_id, "pong received"),
            Ok(Err(e)) => {
                tracing::debug!(%conn_id, error = %e, "ping failed");
                actor.cancel.cancel();
                break;
            }
            Err(_) => {
                tracing::info!(%conn_id, "keepalive timed out");
                actor.cancel.cancel();
                break;
            }
        }
    }
}

/// Decodes queued frames one at a time, preserving their order.
async fn process_loop<C>(
    actor: Arc<ConnectionActor<C>>,
    mut inbound: mpsc::Receiver<String>,
    room: watch::Receiver<Option<RoomHandle>>,
) where
    C: Connection<Error = TransportError>,
{
    loop {
        let text = tokio::select! {
            _ = actor.cancel.cancelled() => break,
            text = inbound.recv() => match text {
                Some(text) => text,
                None => break,
            },
        };
        actor.process(&text, &room).await;
    }
}
