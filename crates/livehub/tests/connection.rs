//! Connection actor tests over an in-memory transport.
//!
//! `ScriptedConnection` feeds frames from a channel and records what the
//! actor writes, so back-pressure and stalled writes can be driven without
//! a socket.

use std::time::Duration;

use livehub::{Hub, HubConfig, HubHandle};
use livehub_session::{AccountType, Identity};
use livehub_transport::{CloseCode, Connection, ConnectionId, Frame, TransportError};
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};

/// What the actor did to the transport.
#[derive(Debug)]
enum Written {
    Text(String),
    Close(CloseCode),
}

struct ScriptedConnection {
    id: ConnectionId,
    frames: Mutex<mpsc::UnboundedReceiver<Frame>>,
    written: mpsc::UnboundedSender<Written>,
    /// When set, `send_text` never completes.
    stall_writes: bool,
}

impl Connection for ScriptedConnection {
    type Error = TransportError;

    async fn send_text(&self, text: &str) -> Result<(), Self::Error> {
        if self.stall_writes {
            std::future::pending::<()>().await;
        }
        let _ = self.written.send(Written::Text(text.to_owned()));
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Frame>, Self::Error> {
        Ok(self.frames.lock().await.recv().await)
    }

    async fn ping(&self) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn close(&self, code: CloseCode, _reason: &str) -> Result<(), Self::Error> {
        let _ = self.written.send(Written::Close(code));
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

struct Peer {
    frames: mpsc::UnboundedSender<Frame>,
    written: mpsc::UnboundedReceiver<Written>,
}

impl Peer {
    fn send(&self, value: Value) {
        self.frames
            .send(Frame::Text(value.to_string()))
            .expect("actor should still be reading");
    }

    /// Returns the next text frame the actor wrote, as JSON.
    async fn next_text(&mut self) -> Value {
        loop {
            let written = tokio::time::timeout(Duration::from_secs(2), self.written.recv())
                .await
                .expect("timed out waiting for write")
                .expect("connection dropped");
            if let Written::Text(text) = written {
                return serde_json::from_str(&text).expect("valid JSON");
            }
        }
    }
}

async fn admit(hub: &HubHandle, id: u64, name: &str, stall_writes: bool) -> Peer {
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let (written_tx, written_rx) = mpsc::unbounded_channel();
    let conn = ScriptedConnection {
        id: ConnectionId::new(id),
        frames: Mutex::new(frames_rx),
        written: written_tx,
        stall_writes,
    };
    hub.admit(conn, Identity::new(name, name, AccountType::Guest))
        .await
        .expect("hub running");
    Peer {
        frames: frames_tx,
        written: written_rx,
    }
}

#[tokio::test]
async fn test_full_inbound_queue_reports_server_busy_and_keeps_serving() {
    let hub = Hub::spawn(HubConfig {
        recv_buffer: 1,
        ..HubConfig::default()
    });
    let mut ana = admit(&hub, 1, "ana", false).await;

    // Leaving while not in a room produces no output, so the only frames
    // written during the flood are busy errors.
    for _ in 0..200 {
        ana.send(json!({"type": "leave-room"}));
    }
    let busy = ana.next_text().await;
    assert_eq!(busy["type"], "error");
    assert_eq!(busy["sender"], "");
    assert_eq!(busy["payload"]["code"], "server-busy");

    // Let the flood drain, then check the connection still works.
    tokio::time::sleep(Duration::from_millis(200)).await;
    ana.send(json!({"type": "join-room", "payload": {"roomName": "r1"}}));
    loop {
        let msg = ana.next_text().await;
        if msg["type"] == "join-room" {
            assert_eq!(msg["sender"], "ana");
            break;
        }
        assert_eq!(msg["payload"]["code"], "server-busy");
    }

    let snap = hub.snapshot().await.unwrap();
    assert_eq!(snap.clients, vec!["ana"]);
    assert_eq!(snap.rooms["r1"], vec!["ana"]);
}

#[tokio::test]
async fn test_stalled_write_tears_connection_down() {
    let write_timeout = Duration::from_millis(100);
    let hub = Hub::spawn(HubConfig {
        write_timeout,
        ..HubConfig::default()
    });
    let mut ana = admit(&hub, 1, "ana", true).await;
    assert_eq!(hub.snapshot().await.unwrap().clients, vec!["ana"]);

    // Not in a room, so this queues an error the transport never accepts.
    ana.send(json!({"type": "chat", "payload": "hello?"}));

    let closed = tokio::time::timeout(write_timeout * 10, ana.written.recv())
        .await
        .expect("actor should give up on the stalled write");
    assert!(matches!(closed, Some(Written::Close(CloseCode::Normal))), "{closed:?}");

    for _ in 0..50 {
        if hub.snapshot().await.unwrap().clients.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("stalled connection was never unregistered");
}

#[tokio::test]
async fn test_peer_close_unregisters() {
    let hub = Hub::spawn(HubConfig::default());
    let ana = admit(&hub, 1, "ana", false).await;
    let Peer { frames, mut written } = ana;

    drop(frames);

    let closed = tokio::time::timeout(Duration::from_secs(1), written.recv())
        .await
        .expect("actor should close");
    assert!(matches!(closed, Some(Written::Close(CloseCode::Normal))));
    for _ in 0..50 {
        if hub.snapshot().await.unwrap().clients.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("closed connection was never unregistered");
}
