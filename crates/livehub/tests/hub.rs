//! Hub dispatcher tests with channel-backed clients (no sockets).

use std::time::Duration;

use livehub::{Hub, HubConfig, HubError, HubHandle};
use livehub_room::{ClientHandle, Outbound, RoomHandle};
use livehub_session::{AccountType, Identity};
use livehub_transport::ConnectionId;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

struct TestClient {
    handle: ClientHandle,
    rx: mpsc::Receiver<Outbound>,
    room: watch::Receiver<Option<RoomHandle>>,
}

fn client(id: u64, name: &str) -> TestClient {
    let (tx, rx) = mpsc::channel(32);
    let identity = Identity::new(name, name, AccountType::Guest);
    let (handle, room) =
        ClientHandle::new(ConnectionId::new(id), identity, tx, CancellationToken::new());
    TestClient { handle, rx, room }
}

async fn registered(hub: &HubHandle, id: u64, name: &str) -> TestClient {
    let c = client(id, name);
    hub.register(c.handle.clone()).await.unwrap();
    c
}

async fn next(rx: &mut mpsc::Receiver<Outbound>) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("channel closed");
    serde_json::from_str(&frame).unwrap()
}

async fn drain(rx: &mut mpsc::Receiver<Outbound>) {
    while tokio::time::timeout(Duration::from_millis(20), rx.recv())
        .await
        .is_ok()
    {}
}

fn room_name(c: &TestClient) -> Option<String> {
    c.room.borrow().as_ref().map(|r| r.name().to_owned())
}

#[tokio::test]
async fn test_register_and_snapshot() {
    let hub = Hub::spawn(HubConfig::default());
    let _ben = registered(&hub, 2, "ben").await;
    let _ana = registered(&hub, 1, "ana").await;

    let snap = hub.snapshot().await.unwrap();
    assert_eq!(snap.clients, vec!["ana", "ben"]);
    assert!(snap.rooms.is_empty());
}

#[tokio::test]
async fn test_join_creates_room_and_sets_current_room() {
    let hub = Hub::spawn(HubConfig::default());
    let mut ana = registered(&hub, 1, "ana").await;

    hub.join(ana.handle.clone(), "r1").await.unwrap();

    assert_eq!(room_name(&ana).as_deref(), Some("r1"));
    let notice = next(&mut ana.rx).await;
    assert_eq!(notice["type"], "join-room");
    assert_eq!(notice["payload"], json!({"roomName": "r1", "members": ["ana"]}));

    let snap = hub.snapshot().await.unwrap();
    assert_eq!(snap.rooms["r1"], vec!["ana"]);
}

#[tokio::test]
async fn test_member_of_at_most_one_room() {
    let hub = Hub::spawn(HubConfig::default());
    let mut ana = registered(&hub, 1, "ana").await;
    let _ben = {
        let ben = registered(&hub, 2, "ben").await;
        hub.join(ben.handle.clone(), "r1").await.unwrap();
        ben
    };

    hub.join(ana.handle.clone(), "r1").await.unwrap();
    hub.join(ana.handle.clone(), "r2").await.unwrap();

    assert_eq!(room_name(&ana).as_deref(), Some("r2"));
    let snap = hub.snapshot().await.unwrap();
    assert_eq!(snap.rooms["r1"], vec!["ben"]);
    assert_eq!(snap.rooms["r2"], vec!["ana"]);

    // Joined r1, left r1 (the leaver is told too), joined r2. The two
    // rooms are separate tasks, so only the set is deterministic.
    let mut kinds = Vec::new();
    for _ in 0..3 {
        kinds.push(next(&mut ana.rx).await["type"].as_str().unwrap().to_owned());
    }
    kinds.sort();
    assert_eq!(kinds, vec!["join-room", "join-room", "leave-room"]);
}

#[tokio::test]
async fn test_rejoining_current_room_is_noop() {
    let hub = Hub::spawn(HubConfig::default());
    let mut ana = registered(&hub, 1, "ana").await;

    hub.join(ana.handle.clone(), "r1").await.unwrap();
    let first = room_name(&ana);
    hub.join(ana.handle.clone(), "r1").await.unwrap();

    assert_eq!(room_name(&ana), first);
    assert_eq!(next(&mut ana.rx).await["type"], "join-room");
    drain(&mut ana.rx).await;
    assert!(ana.rx.try_recv().is_err());
}

#[tokio::test]
async fn test_leave_clears_room_and_discards_empty_room() {
    let hub = Hub::spawn(HubConfig::default());
    let mut ana = registered(&hub, 1, "ana").await;
    hub.join(ana.handle.clone(), "r1").await.unwrap();
    drain(&mut ana.rx).await;

    hub.leave(ana.handle.clone()).await.unwrap();

    assert_eq!(room_name(&ana), None);
    let notice = next(&mut ana.rx).await;
    assert_eq!(notice["type"], "leave-room");
    assert_eq!(notice["payload"]["members"], json!([]));
    assert!(hub.snapshot().await.unwrap().rooms.is_empty());

    // Leaving again is harmless.
    hub.leave(ana.handle.clone()).await.unwrap();
}

#[tokio::test]
async fn test_unregister_removes_from_room() {
    let hub = Hub::spawn(HubConfig::default());
    let ana = registered(&hub, 1, "ana").await;
    let mut ben = registered(&hub, 2, "ben").await;
    hub.join(ana.handle.clone(), "r1").await.unwrap();
    hub.join(ben.handle.clone(), "r1").await.unwrap();
    drain(&mut ben.rx).await;

    hub.unregister(ana.handle.id(), "ana").await.unwrap();

    let notice = next(&mut ben.rx).await;
    assert_eq!(notice["type"], "leave-room");
    assert_eq!(notice["sender"], "ana");
    let snap = hub.snapshot().await.unwrap();
    assert_eq!(snap.clients, vec!["ben"]);
    assert_eq!(snap.rooms["r1"], vec!["ben"]);
}

#[tokio::test]
async fn test_last_member_out_discards_room() {
    let hub = Hub::spawn(HubConfig::default());
    let ana = registered(&hub, 1, "ana").await;
    hub.join(ana.handle.clone(), "r1").await.unwrap();
    let room = ana.handle.current_room().unwrap();

    hub.unregister(ana.handle.id(), "ana").await.unwrap();

    let snap = hub.snapshot().await.unwrap();
    assert!(snap.clients.is_empty());
    assert!(snap.rooms.is_empty());
    // The room actor has been told to stop.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(room.get_info().await.is_err());
}

#[tokio::test]
async fn test_second_login_displaces_first() {
    let hub = Hub::spawn(HubConfig::default());
    let first = registered(&hub, 1, "ana").await;
    hub.join(first.handle.clone(), "r1").await.unwrap();

    let second = registered(&hub, 2, "ana").await;

    assert!(first.handle.is_disconnected());
    assert!(!second.handle.is_disconnected());
    assert_eq!(room_name(&first), None);
    let snap = hub.snapshot().await.unwrap();
    assert_eq!(snap.clients, vec!["ana"]);
    assert!(snap.rooms.is_empty());

    // The displaced connection's own unregister must not evict the new one.
    hub.unregister(first.handle.id(), "ana").await.unwrap();
    assert_eq!(hub.snapshot().await.unwrap().clients, vec!["ana"]);
    hub.join(second.handle.clone(), "r2").await.unwrap();
    assert_eq!(room_name(&second).as_deref(), Some("r2"));
}

#[tokio::test]
async fn test_join_from_displaced_handle_is_ignored() {
    let hub = Hub::spawn(HubConfig::default());
    let first = registered(&hub, 1, "ana").await;
    let _second = registered(&hub, 2, "ana").await;

    hub.join(first.handle.clone(), "r1").await.unwrap();

    assert_eq!(room_name(&first), None);
    assert!(hub.snapshot().await.unwrap().rooms.is_empty());
}

#[tokio::test]
async fn test_failed_join_discards_dead_room() {
    let hub = Hub::spawn(HubConfig::default());
    let ana = registered(&hub, 1, "ana").await;
    let mut ben = registered(&hub, 2, "ben").await;
    hub.join(ana.handle.clone(), "r1").await.unwrap();

    // Stop the room actor behind the hub's back.
    ana.handle.current_room().unwrap().shutdown().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    hub.join(ben.handle.clone(), "r1").await.unwrap();

    assert_eq!(room_name(&ben), None);
    assert_eq!(room_name(&ana), None);
    assert!(hub.snapshot().await.unwrap().rooms.is_empty());

    // The name is free again.
    hub.join(ben.handle.clone(), "r1").await.unwrap();
    assert_eq!(room_name(&ben).as_deref(), Some("r1"));
    assert_eq!(next(&mut ben.rx).await["type"], "join-room");
    assert_eq!(hub.snapshot().await.unwrap().rooms["r1"], vec!["ben"]);
}

#[tokio::test]
async fn test_shutdown_disconnects_everyone() {
    let hub = Hub::spawn(HubConfig::default());
    let ana = registered(&hub, 1, "ana").await;
    let ben = registered(&hub, 2, "ben").await;
    hub.join(ana.handle.clone(), "r1").await.unwrap();

    hub.shutdown().await.unwrap();

    assert!(ana.handle.is_disconnected());
    assert!(ben.handle.is_disconnected());
    assert_eq!(room_name(&ana), None);
    assert!(matches!(hub.snapshot().await, Err(HubError::Closed)));
}
