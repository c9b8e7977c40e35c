// Teardown: a peer vanishing without a close frame, or a socket that stops
// accepting writes, must still leave its rooms and the hub exactly once

use futures_util::{sink, stream, SinkExt, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use warp::ws::Message as WsMessage;

use rusty_rooms::auth::user::User;
use rusty_rooms::config::ServerConfig;
use rusty_rooms::context::AppContext;
use rusty_rooms::core::connection::{ClientHandle, Connection, ConnectionSettings};
use rusty_rooms::core::hub::{Hub, HubHandle};
use rusty_rooms::core::message::{Action, Message as Envelope};
use rusty_rooms::handlers::routes;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> (String, HubHandle) {
    let ctx = AppContext::in_memory(ServerConfig::for_testing());
    let hub = Hub::start(ctx.clone()).await.unwrap();

    let (addr, server) = warp::serve(routes(ctx, hub.clone())).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    (format!("ws://{}/ws", addr), hub)
}

async fn read_envelopes(socket: &mut Socket) -> Vec<Envelope> {
    match timeout(Duration::from_secs(1), socket.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| Envelope::decode(l).unwrap())
            .collect(),
        _ => Vec::new(),
    }
}

/// Collect envelopes until `pred` matches one or a read times out
async fn wait_for(socket: &mut Socket, pred: impl Fn(&Envelope) -> bool) -> Option<Envelope> {
    loop {
        let batch = read_envelopes(socket).await;
        if batch.is_empty() {
            return None;
        }
        if let Some(found) = batch.into_iter().find(|e| pred(e)) {
            return Some(found);
        }
    }
}

async fn join_general(socket: &mut Socket) {
    socket
        .send(Message::Text(
            json!({"action": "join-room", "message": "general"}).to_string(),
        ))
        .await
        .unwrap();
    wait_for(socket, |e| e.action == Action::RoomJoined)
        .await
        .expect("room-joined never arrived");
}

#[tokio::test]
async fn test_dropped_socket_tears_down_once() {
    let (url, hub) = start_server().await;

    let (mut alice, _) = connect_async(format!("{}?name=alice", url)).await.unwrap();
    join_general(&mut alice).await;

    let (mut bob, _) = connect_async(format!("{}?name=bob", url)).await.unwrap();
    join_general(&mut bob).await;
    wait_for(&mut alice, |e| e.message == "bob joined the room")
        .await
        .expect("join notice never arrived");

    // No close handshake, just gone
    drop(bob);

    let left = wait_for(&mut alice, |e| e.message == "bob left the room").await;
    assert!(left.is_some());

    // Teardown never repeats its announcements
    assert!(wait_for(&mut alice, |e| e.message == "bob left the room")
        .await
        .is_none());
    assert_eq!(hub.client_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_writer_failure_tears_down_once() {
    let config = ServerConfig::for_testing();
    let settings = ConnectionSettings::from_config(&config);
    let hub = Hub::start(AppContext::in_memory(config)).await.unwrap();

    let (observer, mut observer_rx, _control) =
        ClientHandle::channel(User::anonymous("watcher".to_string()), 64);
    hub.register(observer.clone()).unwrap();
    let general = hub
        .find_or_create_room("general", false)
        .await
        .unwrap()
        .unwrap();
    general.register(observer.clone()).unwrap();

    // The peer asks to join, then stays silent without ever closing
    let inbound = stream::iter(vec![Ok::<_, Infallible>(WsMessage::text(
        json!({"action": "join-room", "message": "general"}).to_string(),
    ))])
    .chain(stream::pending());

    // The socket rejects the first frame carrying the room confirmation
    let outbound = Box::pin(sink::unfold((), |_, frame: WsMessage| async move {
        match frame.to_str() {
            Ok(text) if text.contains("room-joined") => Err("peer gone"),
            _ => Ok(()),
        }
    }));

    let user = User::anonymous("ghost".to_string());
    timeout(
        Duration::from_secs(2),
        Connection::drive(inbound, outbound, user, hub.clone(), settings),
    )
    .await
    .expect("read side never noticed the dead writer");

    let mut seen = Vec::new();
    while let Ok(Some(payload)) = timeout(Duration::from_millis(300), observer_rx.recv()).await {
        for line in payload.lines() {
            seen.push(Envelope::decode(line).unwrap());
        }
    }

    let room_leaves = seen
        .iter()
        .filter(|e| e.message == "ghost left the room")
        .count();
    let user_lefts = seen
        .iter()
        .filter(|e| e.action == Action::UserLeft)
        .count();
    assert_eq!(room_leaves, 1);
    assert_eq!(user_lefts, 1);

    assert_eq!(hub.client_count().await.unwrap(), 1);
    assert_eq!(general.member_ids().await.unwrap(), vec![observer.conn_id()]);
}
