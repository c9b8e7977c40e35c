//! Room actor: one broadcast domain bridged to its pub/sub channel
//!
//! Members are only touched by the room's own loop. Local broadcasts are
//! published on the room channel and delivered when they come back, so
//! local and remote traffic share the channel's ordering.

use futures_util::StreamExt;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::core::connection::ClientHandle;
use crate::core::echo::EchoFilter;
use crate::core::identity::Identifiable;
use crate::constants::{PRIVATE_ROOM_PREFIX, ROOM_CHANNEL_PREFIX};
use crate::core::message::{Action, Message, RoomRef, UserRef};
use crate::error::{Result, RustyRoomsError};
use crate::pubsub::{SharedPubSub, Subscription};

const JOINED_NOTICE: &str = "joined the room";
const LEFT_NOTICE: &str = "left the room";

/// Private room names live in their own namespace so no public room can
/// share one
pub fn is_private_room_name(name: &str) -> bool {
    name.starts_with(PRIVATE_ROOM_PREFIX)
}

/// Bus channel of a room, kept apart from the presence channel
pub fn room_channel(name: &str) -> String {
    format!("{}{}", ROOM_CHANNEL_PREFIX, name)
}

/// Commands accepted by a room loop
pub enum RoomCommand {
    Register(ClientHandle),
    Unregister(ClientHandle),
    Broadcast(Message),
    Members(oneshot::Sender<Vec<Uuid>>),
}

/// Cheap, cloneable reference to a running room
#[derive(Clone)]
pub struct RoomHandle {
    info: RoomRef,
    commands: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn is_private(&self) -> bool {
        self.info.private
    }

    /// Wire representation of this room
    pub fn info(&self) -> RoomRef {
        self.info.clone()
    }

    fn send(&self, command: RoomCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| RustyRoomsError::RoomUnavailable(self.info.name.clone()))
    }

    pub fn register(&self, client: ClientHandle) -> Result<()> {
        self.send(RoomCommand::Register(client))
    }

    pub fn unregister(&self, client: ClientHandle) -> Result<()> {
        self.send(RoomCommand::Unregister(client))
    }

    /// Publish a message to every member across all instances
    pub fn broadcast(&self, message: Message) -> Result<()> {
        self.send(RoomCommand::Broadcast(message))
    }

    /// Connection ids of the local members
    pub async fn member_ids(&self) -> Result<Vec<Uuid>> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Members(reply))?;
        rx.await
            .map_err(|_| RustyRoomsError::RoomUnavailable(self.info.name.clone()))
    }
}

impl Identifiable for RoomHandle {
    fn id(&self) -> &str {
        &self.info.id
    }

    fn display_name(&self) -> &str {
        &self.info.name
    }
}

pub struct Room {
    info: RoomRef,
    members: HashMap<Uuid, ClientHandle>,
    echoes: EchoFilter,
    bus: SharedPubSub,
    channel: String,
    subscription: Option<Subscription>,
    commands: mpsc::UnboundedReceiver<RoomCommand>,
}

impl Room {
    /// Subscribe to the room channel and spawn the room loop.
    /// The loop runs for the rest of the process lifetime.
    pub async fn start(id: String, name: String, private: bool, bus: SharedPubSub) -> RoomHandle {
        let channel = room_channel(&name);
        let subscription = match bus.subscribe(&channel).await {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                error!(
                    "Failed to subscribe to room channel {}: {} - cross-instance delivery disabled",
                    channel, e
                );
                None
            }
        };

        let info = RoomRef { id, name, private };
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let room = Room {
            info: info.clone(),
            members: HashMap::new(),
            echoes: EchoFilter::new(),
            bus,
            channel,
            subscription,
            commands: commands_rx,
        };
        tokio::spawn(room.run());

        RoomHandle {
            info,
            commands: commands_tx,
        }
    }

    async fn run(mut self) {
        info!(
            "Room {} ({}) started{}",
            self.info.name,
            self.info.id,
            if self.info.private { " [private]" } else { "" }
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                payload = next_payload(&mut self.subscription) => match payload {
                    Some(payload) => self.deliver_received(&payload),
                    None => {
                        warn!(
                            "Subscription for room {} ended, delivering locally only",
                            self.info.name
                        );
                        self.subscription = None;
                    }
                },
            }
        }

        debug!("Room {} loop stopped", self.info.name);
    }

    async fn handle_command(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Register(client) => self.register_client(client).await,
            RoomCommand::Unregister(client) => self.unregister_client(client).await,
            RoomCommand::Broadcast(mut message) => {
                message.target = Some(self.info.clone());
                match message.encode() {
                    Ok(payload) => self.publish(payload, None).await,
                    Err(e) => error!("Failed to encode message for room {}: {}", self.info.name, e),
                }
            }
            RoomCommand::Members(reply) => {
                let _ = reply.send(self.members.keys().copied().collect());
            }
        }
    }

    async fn register_client(&mut self, client: ClientHandle) {
        let conn_id = client.conn_id();
        if self.members.contains_key(&conn_id) {
            debug!("Connection {} already in room {}", conn_id, self.info.name);
            return;
        }

        // Announce before adding so the joiner never receives its own notice
        if !self.info.private {
            let notice = self.notice(&client, JOINED_NOTICE);
            match notice.encode() {
                Ok(payload) => self.publish(payload, Some(conn_id)).await,
                Err(e) => error!("Failed to encode join notice: {}", e),
            }
        }

        self.members.insert(conn_id, client);
        debug!(
            "Connection {} joined room {} ({} local members)",
            conn_id,
            self.info.name,
            self.members.len()
        );
    }

    async fn unregister_client(&mut self, client: ClientHandle) {
        let conn_id = client.conn_id();
        if self.members.remove(&conn_id).is_none() {
            return;
        }
        self.echoes.forget(conn_id);

        let notice = self.notice(&client, LEFT_NOTICE);
        match notice.encode() {
            Ok(payload) => self.publish(payload, None).await,
            Err(e) => error!("Failed to encode leave notice: {}", e),
        }
        debug!("Connection {} left room {}", conn_id, self.info.name);
    }

    fn notice(&self, client: &ClientHandle, what: &str) -> Message {
        Message::new(Action::SendMessage)
            .with_text(format!("{} {}", client.display_name(), what))
            .with_target(self.info.clone())
            .with_sender(UserRef::of(client))
    }

    /// Publish on the room channel. When no echo can come back (publish
    /// failed or no subscription) the payload is delivered locally right away.
    async fn publish(&mut self, payload: String, skip_echo_for: Option<Uuid>) {
        let published = match self.bus.publish(&self.channel, &payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Failed to publish to room {}: {} - delivering locally only",
                    self.info.name, e
                );
                false
            }
        };

        if published && self.subscription.is_some() {
            if let Some(conn_id) = skip_echo_for {
                self.echoes.expect(payload, conn_id);
            }
        } else {
            self.deliver_local(&payload, None);
        }
    }

    fn deliver_received(&mut self, payload: &str) {
        let skip = self.echoes.take(payload);
        self.deliver_local(payload, skip);
    }

    fn deliver_local(&self, payload: &str, skip: Option<Uuid>) {
        for (conn_id, member) in &self.members {
            if Some(*conn_id) == skip {
                continue;
            }
            member.send(payload);
        }
    }
}

async fn next_payload(subscription: &mut Option<Subscription>) -> Option<String> {
    match subscription {
        Some(stream) => stream.next().await,
        None => futures_util::future::pending().await,
    }
}
