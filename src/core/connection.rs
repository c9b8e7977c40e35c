//! WebSocket connection management
//! Handles the lifecycle of client connections
//!
//! Each socket gets a read task (this `Connection`, which owns the joined
//! rooms and performs teardown) and a write task draining a bounded outbound
//! queue. Hub and rooms reach the connection through a `ClientHandle`.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use uuid::Uuid;
use warp::ws::{Message as WsMessage, WebSocket};

use crate::auth::user::User;
use crate::config::ServerConfig;
use crate::constants::PRIVATE_ROOM_PREFIX;
use crate::core::hub::HubHandle;
use crate::core::identity::Identifiable;
use crate::core::message::{frame_lines, Action, Message, RoomRef, UserRef};
use crate::core::room::{is_private_room_name, RoomHandle};
use crate::error::{Result, RustyRoomsError};

/// Close codes that mean the peer left on purpose
const CLEAN_CLOSE_CODES: [u16; 2] = [1000, 1001];

/// Events the hub delivers to a connection's read task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Self-join a private room on behalf of an invite, keeping the
    /// inviter's room id
    JoinPrivate { room: RoomRef, inviter: UserRef },
}

/// Per-connection limits and timers
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub send_queue_capacity: usize,
    pub max_message_size: usize,
    pub pong_wait: Duration,
    pub ping_interval: Duration,
    pub write_wait: Duration,
}

impl ConnectionSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            send_queue_capacity: config.send_queue_capacity,
            max_message_size: config.max_message_size,
            pong_wait: config.pong_wait,
            ping_interval: config.ping_interval,
            write_wait: config.write_wait,
        }
    }
}

/// What the hub and rooms hold for a connection: its identity, its bounded
/// outbound queue and its control inbox. Cloning is cheap.
#[derive(Clone)]
pub struct ClientHandle {
    conn_id: Uuid,
    user: User,
    outbound: mpsc::Sender<String>,
    control: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ClientHandle {
    pub fn new(
        user: User,
        outbound: mpsc::Sender<String>,
        control: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            user,
            outbound,
            control,
        }
    }

    /// Handle plus the receiving ends of its outbound queue and control inbox
    pub fn channel(
        user: User,
        capacity: usize,
    ) -> (
        Self,
        mpsc::Receiver<String>,
        mpsc::UnboundedReceiver<ConnectionEvent>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        (Self::new(user, outbound_tx, control_tx), outbound_rx, control_rx)
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    /// Enqueue a payload without waiting. A full queue drops the payload.
    pub fn send(&self, payload: &str) -> bool {
        match self.outbound.try_send(payload.to_string()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Outbound queue full for connection {} ({}), dropping message",
                    self.conn_id, self.user.name
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Outbound queue closed for connection {}", self.conn_id);
                false
            }
        }
    }

    /// Deliver a control event to the read task
    pub fn notify(&self, event: ConnectionEvent) -> bool {
        self.control.send(event).is_ok()
    }
}

impl Identifiable for ClientHandle {
    fn id(&self) -> &str {
        &self.user.id
    }

    fn display_name(&self) -> &str {
        &self.user.name
    }
}

/// Deterministic name of the private room shared by two identities,
/// independent of who invites whom. Always carries the private prefix,
/// which `join-room` refuses.
pub fn private_room_name(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{}{}{}", PRIVATE_ROOM_PREFIX, first, second)
}

/// When the next ping is due: one ping interval after the later of the
/// last inbound frame and the last ping. Inbound traffic already proves
/// liveness, so a chatty peer is never pinged.
pub fn next_keepalive(last_inbound: Instant, last_ping: Instant, settings: &ConnectionSettings) -> Instant {
    last_inbound.max(last_ping) + settings.ping_interval
}

/// Read side of one client connection
pub struct Connection {
    handle: ClientHandle,
    hub: HubHandle,
    rooms: HashMap<String, RoomHandle>,
    shutdown: Option<oneshot::Sender<()>>,
    torn_down: bool,
}

impl Connection {
    /// `shutdown` stops the write task once teardown runs
    pub fn new(handle: ClientHandle, hub: HubHandle, shutdown: oneshot::Sender<()>) -> Self {
        Self {
            handle,
            hub,
            rooms: HashMap::new(),
            shutdown: Some(shutdown),
            torn_down: false,
        }
    }

    pub fn handle(&self) -> &ClientHandle {
        &self.handle
    }

    /// Ids of the rooms this connection has joined
    pub fn joined_room_ids(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }

    /// Drive an upgraded socket until it fails or closes, then tear down
    pub async fn serve(socket: WebSocket, user: User, hub: HubHandle, settings: ConnectionSettings) {
        let (ws_tx, ws_rx) = socket.split();
        Self::drive(ws_rx, ws_tx, user, hub, settings).await;
    }

    /// Run both halves of a connection over any frame stream and sink.
    /// Returns once teardown has run, whichever side failed first.
    pub async fn drive<R, W, E>(
        ws_rx: R,
        ws_tx: W,
        user: User,
        hub: HubHandle,
        settings: ConnectionSettings,
    ) where
        R: Stream<Item = std::result::Result<WsMessage, E>> + Unpin + Send,
        E: Display,
        W: Sink<WsMessage> + Unpin + Send + 'static,
        W::Error: Display,
    {
        let (handle, outbound_rx, control_rx) =
            ClientHandle::channel(user, settings.send_queue_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (writer_done_tx, writer_done_rx) = oneshot::channel();
        let (activity_tx, activity_rx) = watch::channel(Instant::now());

        info!(
            "Client connected: {} ({}) as {}",
            handle.user().name,
            handle.user().id,
            handle.conn_id()
        );

        tokio::spawn(write_pump(
            ws_tx,
            outbound_rx,
            shutdown_rx,
            writer_done_tx,
            activity_rx,
            settings.clone(),
            handle.conn_id(),
        ));

        let mut connection = Connection::new(handle, hub, shutdown_tx);
        if let Err(e) = connection.hub.register(connection.handle.clone()) {
            error!(
                "Failed to register connection {}: {}",
                connection.handle.conn_id(),
                e
            );
            connection.disconnect();
            return;
        }

        connection
            .read_pump(ws_rx, control_rx, writer_done_rx, activity_tx, &settings)
            .await;
        connection.disconnect();
    }

    async fn read_pump<R, E>(
        &mut self,
        mut ws_rx: R,
        mut control_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
        mut writer_done: oneshot::Receiver<()>,
        activity: watch::Sender<Instant>,
        settings: &ConnectionSettings,
    ) where
        R: Stream<Item = std::result::Result<WsMessage, E>> + Unpin,
        E: Display,
    {
        let conn_id = self.handle.conn_id();
        let mut deadline = Instant::now() + settings.pong_wait;

        loop {
            tokio::select! {
                frame = tokio::time::timeout_at(deadline, ws_rx.next()) => match frame {
                    Err(_) => {
                        warn!("Read deadline expired for connection {}", conn_id);
                        break;
                    }
                    Ok(None) => {
                        debug!("Socket stream ended for connection {}", conn_id);
                        break;
                    }
                    Ok(Some(Err(e))) => {
                        error!("WebSocket read error on connection {}: {}", conn_id, e);
                        break;
                    }
                    Ok(Some(Ok(msg))) => {
                        // Any inbound frame, pong included, proves liveness
                        let now = Instant::now();
                        deadline = now + settings.pong_wait;
                        activity.send_replace(now);

                        if msg.is_close() {
                            log_close(conn_id, &msg);
                            break;
                        }
                        if msg.is_text() {
                            if let Ok(text) = msg.to_str() {
                                self.handle_frame(text).await;
                            }
                        }
                    }
                },
                Some(event) = control_rx.recv() => self.handle_event(event).await,
                _ = &mut writer_done => {
                    debug!("Writer stopped for connection {}", conn_id);
                    break;
                }
            }
        }
    }

    /// Decode and dispatch every line of a text frame
    pub async fn handle_frame(&mut self, text: &str) {
        for line in frame_lines(text) {
            match Message::decode(line) {
                Ok(message) => self.dispatch(message).await,
                Err(e) => warn!(
                    "Dropping malformed frame from connection {}: {}",
                    self.handle.conn_id(),
                    e
                ),
            }
        }
    }

    pub async fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::JoinPrivate { room, inviter } => {
                self.join_room(&room.name, Some(inviter), Some(room.id)).await;
            }
        }
    }

    async fn dispatch(&mut self, mut message: Message) {
        message.stamp_sender(&self.handle);

        match message.action {
            Action::SendMessage => self.handle_send_message(message).await,
            Action::JoinRoom => {
                let name = message.message.trim().to_string();
                if name.is_empty() {
                    debug!("Ignoring join-room without a room name");
                    return;
                }
                if is_private_room_name(&name) {
                    debug!(
                        "Connection {} tried to join private room {} by name",
                        self.handle.conn_id(),
                        name
                    );
                    return;
                }
                self.join_room(&name, None, None).await;
            }
            Action::LeaveRoom => self.handle_leave_room(&message),
            Action::JoinRoomPrivate => self.handle_join_room_private(&message).await,
            other => debug!(
                "Ignoring client action {:?} from connection {}",
                other,
                self.handle.conn_id()
            ),
        }
    }

    async fn handle_send_message(&mut self, message: Message) {
        let room_id = match message.target_id() {
            Some(id) => id.to_string(),
            None => {
                debug!("Dropping send-message without target room");
                return;
            }
        };

        let room = match self.rooms.get(&room_id) {
            Some(room) => Some(room.clone()),
            None => match self.hub.find_room_by_id(&room_id).await {
                Ok(room) => room.filter(|r| !r.is_private()),
                Err(e) => {
                    warn!("Room lookup failed: {}", e);
                    None
                }
            },
        };

        match room {
            Some(room) => {
                if let Err(e) = room.broadcast(message) {
                    warn!("Failed to forward message to room {}: {}", room.name(), e);
                }
            }
            None => debug!("Dropping message for unknown room {}", room_id),
        }
    }

    fn handle_leave_room(&mut self, message: &Message) {
        let room_id = if message.message.is_empty() {
            message.target_id().unwrap_or_default().to_string()
        } else {
            message.message.clone()
        };

        if let Some(room) = self.rooms.remove(&room_id) {
            if let Err(e) = room.unregister(self.handle.clone()) {
                warn!("Failed to leave room {}: {}", room.name(), e);
            }
        }
    }

    async fn handle_join_room_private(&mut self, message: &Message) {
        let target_id = message.message.trim();
        if target_id.is_empty() || target_id == self.handle.user().id {
            debug!("Ignoring private room request without a valid peer");
            return;
        }

        let target = match self.hub.find_user_by_id(target_id).await {
            Ok(Some(target)) => target,
            Ok(None) => {
                debug!("Private room requested with unknown user {}", target_id);
                return;
            }
            Err(e) => {
                warn!("User lookup failed: {}", e);
                return;
            }
        };

        let room_name = private_room_name(&target.id, &self.handle.user().id);
        if let Some(room) = self.join_room(&room_name, Some(target.clone()), None).await {
            let inviter = UserRef::of(&self.handle);
            if let Err(e) = self.hub.invite(target.id, room.info(), inviter) {
                warn!("Failed to send invite for room {}: {}", room.name(), e);
            }
        }
    }

    /// Join a room by name, creating it when missing. `peer` marks an
    /// invited join into a private room; `room_id` adopts the id the
    /// inviting instance gave that room.
    async fn join_room(
        &mut self,
        name: &str,
        peer: Option<UserRef>,
        room_id: Option<String>,
    ) -> Option<RoomHandle> {
        let resolved = match room_id {
            Some(id) => {
                self.hub
                    .adopt_private_room(RoomRef {
                        id,
                        name: name.to_string(),
                        private: true,
                    })
                    .await
            }
            None => self.hub.find_or_create_room(name, peer.is_some()).await,
        };

        let room = match resolved {
            Ok(Some(room)) => room,
            Ok(None) => {
                debug!(
                    "Connection {} may not join room {}",
                    self.handle.conn_id(),
                    name
                );
                return None;
            }
            Err(e) => {
                error!("Failed to resolve room {}: {}", name, e);
                return None;
            }
        };

        if !self.rooms.contains_key(room.id()) {
            if let Err(e) = room.register(self.handle.clone()) {
                error!("Failed to join room {}: {}", room.name(), e);
                return None;
            }
            self.rooms.insert(room.id().to_string(), room.clone());
            self.notify_room_joined(&room, peer);
        }

        Some(room)
    }

    fn notify_room_joined(&self, room: &RoomHandle, peer: Option<UserRef>) {
        let mut message = Message::new(Action::RoomJoined).with_target(room.info());
        message.sender = peer;

        match message.encode() {
            Ok(payload) => {
                self.handle.send(&payload);
            }
            Err(e) => error!("Failed to encode room-joined: {}", e),
        }
    }

    /// Full teardown. Safe to call repeatedly; only the first call acts.
    pub fn disconnect(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if let Err(e) = self.hub.unregister(self.handle.clone()) {
            warn!("Failed to unregister connection {}: {}", self.handle.conn_id(), e);
        }

        for (_, room) in self.rooms.drain() {
            if let Err(e) = room.unregister(self.handle.clone()) {
                warn!("Failed to leave room {}: {}", room.name(), e);
            }
        }

        // Stops the writer, which closes the socket
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        info!(
            "Client disconnected: {} ({})",
            self.handle.user().name,
            self.handle.conn_id()
        );
    }
}

fn log_close(conn_id: Uuid, msg: &WsMessage) {
    match msg.close_frame() {
        Some((code, reason)) if !CLEAN_CLOSE_CODES.contains(&code) => {
            warn!(
                "Connection {} closed with code {}: {}",
                conn_id, code, reason
            );
        }
        _ => info!("Connection {} closed by peer", conn_id),
    }
}

/// Drain the outbound queue to the socket, coalescing whatever is already
/// queued into one frame, and ping once the peer has been quiet for a
/// full ping interval.
async fn write_pump<W>(
    mut ws_tx: W,
    mut outbound: mpsc::Receiver<String>,
    mut shutdown: oneshot::Receiver<()>,
    done: oneshot::Sender<()>,
    activity: watch::Receiver<Instant>,
    settings: ConnectionSettings,
    conn_id: Uuid,
) where
    W: Sink<WsMessage> + Unpin,
    W::Error: Display,
{
    let mut last_ping = Instant::now();

    loop {
        let last_inbound = *activity.borrow();
        let keepalive_at = next_keepalive(last_inbound, last_ping, &settings);

        tokio::select! {
            queued = outbound.recv() => match queued {
                Some(first) => {
                    let frame = coalesce(first, &mut outbound, settings.send_queue_capacity);
                    if let Err(e) = send_with_deadline(&mut ws_tx, WsMessage::text(frame), settings.write_wait).await {
                        warn!("Write failed on connection {}: {}", conn_id, e);
                        break;
                    }
                }
                None => {
                    let _ = send_with_deadline(&mut ws_tx, WsMessage::close(), settings.write_wait).await;
                    break;
                }
            },
            _ = tokio::time::sleep_until(keepalive_at) => {
                // Inbound traffic may have pushed the deadline while asleep
                let last_inbound = *activity.borrow();
                if Instant::now() < next_keepalive(last_inbound, last_ping, &settings) {
                    continue;
                }
                if let Err(e) = send_with_deadline(&mut ws_tx, WsMessage::ping(Vec::new()), settings.write_wait).await {
                    warn!("Keepalive failed on connection {}: {}", conn_id, e);
                    break;
                }
                last_ping = Instant::now();
            }
            _ = &mut shutdown => {
                let _ = send_with_deadline(&mut ws_tx, WsMessage::close(), settings.write_wait).await;
                break;
            }
        }
    }

    let _ = ws_tx.close().await;
    let _ = done.send(());
    debug!("Writer for connection {} finished", conn_id);
}

/// Append up to `max_batch` already-queued payloads, one per line
fn coalesce(first: String, outbound: &mut mpsc::Receiver<String>, max_batch: usize) -> String {
    let mut frame = first;
    for _ in 0..max_batch {
        match outbound.try_recv() {
            Ok(next) => {
                frame.push('\n');
                frame.push_str(&next);
            }
            Err(_) => break,
        }
    }
    frame
}

async fn send_with_deadline<W>(ws_tx: &mut W, message: WsMessage, deadline: Duration) -> Result<()>
where
    W: Sink<WsMessage> + Unpin,
    W::Error: Display,
{
    match tokio::time::timeout(deadline, ws_tx.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(RustyRoomsError::ConnectionError(e.to_string())),
        Err(_) => Err(RustyRoomsError::ConnectionError(
            "write deadline exceeded".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::context::AppContext;
    use crate::core::hub::Hub;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next_payload(rx: &mut mpsc::Receiver<String>) -> Message {
        let payload = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for payload")
            .expect("queue closed");
        Message::decode(&payload).unwrap()
    }

    #[test]
    fn test_private_room_name_is_symmetric() {
        assert_eq!(private_room_name("a1", "b2"), "private:a1b2");
        assert_eq!(private_room_name("b2", "a1"), "private:a1b2");
        assert!(is_private_room_name(&private_room_name("a1", "b2")));
    }

    #[test]
    fn test_keepalive_waits_for_a_quiet_interval() {
        let settings = ConnectionSettings::from_config(&ServerConfig::for_testing());
        let start = Instant::now();

        assert_eq!(next_keepalive(start, start, &settings), start + settings.ping_interval);

        // Fresh inbound traffic pushes the ping back
        let spoke = start + Duration::from_secs(30);
        assert_eq!(next_keepalive(spoke, start, &settings), spoke + settings.ping_interval);

        // A ping with no answer schedules the next one from the ping
        let pinged = start + settings.ping_interval;
        assert_eq!(next_keepalive(start, pinged, &settings), pinged + settings.ping_interval);

        // A quiet peer is always pinged before its read deadline lapses
        assert!(next_keepalive(spoke, start, &settings) < spoke + settings.pong_wait);
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let user = User::anonymous("slow".to_string());
        let (handle, mut rx, _control) = ClientHandle::channel(user, 2);

        assert!(handle.send("one"));
        assert!(handle.send("two"));
        assert!(!handle.send("three"));

        assert_eq!(rx.try_recv().unwrap(), "one");
        assert_eq!(rx.try_recv().unwrap(), "two");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_coalesce_joins_queued_payloads() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.try_send("b".to_string()).unwrap();
        tx.try_send("c".to_string()).unwrap();

        assert_eq!(coalesce("a".to_string(), &mut rx, 8), "a\nb\nc");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_coalesce_respects_batch_limit() {
        let (tx, mut rx) = mpsc::channel(8);
        for p in ["b", "c", "d"] {
            tx.try_send(p.to_string()).unwrap();
        }

        assert_eq!(coalesce("a".to_string(), &mut rx, 2), "a\nb\nc");
        assert_eq!(rx.try_recv().unwrap(), "d");
    }

    #[tokio::test]
    async fn test_teardown_runs_exactly_once() {
        let ctx = AppContext::in_memory(ServerConfig::for_testing());
        let hub = Hub::start(ctx).await.unwrap();

        let user = User::anonymous("alice".to_string());
        let (handle, mut rx, _control) = ClientHandle::channel(user, 16);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let mut connection = Connection::new(handle, hub.clone(), shutdown_tx);
        hub.register(connection.handle().clone()).unwrap();

        connection
            .handle_frame(r#"{"action":"join-room","message":"general"}"#)
            .await;
        let joined = next_payload(&mut rx).await;
        assert_eq!(joined.action, Action::RoomJoined);
        let room = hub.find_room_by_name("general").await.unwrap().unwrap();
        assert_eq!(connection.joined_room_ids(), vec![room.id().to_string()]);

        connection.disconnect();
        connection.disconnect();

        assert!(shutdown_rx.try_recv().is_ok());
        assert!(connection.joined_room_ids().is_empty());
        assert_eq!(hub.client_count().await.unwrap(), 0);
        assert!(room.member_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_stop_the_frame() {
        let ctx = AppContext::in_memory(ServerConfig::for_testing());
        let hub = Hub::start(ctx).await.unwrap();

        let user = User::anonymous("bob".to_string());
        let (handle, mut rx, _control) = ClientHandle::channel(user, 16);
        let (shutdown_tx, _shutdown_rx) = oneshot::channel();
        let mut connection = Connection::new(handle, hub, shutdown_tx);

        connection
            .handle_frame("{not json\n{\"action\":\"join-room\",\"message\":\"lobby\"}")
            .await;

        let joined = next_payload(&mut rx).await;
        assert_eq!(joined.action, Action::RoomJoined);
        assert_eq!(joined.target.unwrap().name, "lobby");
    }
}
