//! Hub actor: the process-wide registry of connections and rooms
//!
//! Every mutation of the connection set, the room set and the roster runs
//! inside `Hub::run`. A companion task drains the shared presence channel and
//! feeds each event back into the same loop, so local and remote presence
//! changes take one code path.

use futures_util::StreamExt;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::constants::{PRESENCE_CHANNEL, PRIVATE_ROOM_PREFIX};
use crate::context::AppContext;
use crate::core::connection::{ClientHandle, ConnectionEvent};
use crate::core::echo::EchoFilter;
use crate::core::message::{Action, Message, RoomRef, UserRef};
use crate::core::room::{is_private_room_name, Room, RoomHandle};
use crate::core::roster::Roster;
use crate::error::{Result, RustyRoomsError};
use crate::pubsub::Subscription;
use crate::storage::StoredRoom;

/// Commands accepted by the hub loop
pub enum HubCommand {
    Register(ClientHandle),
    Unregister(ClientHandle),
    Broadcast(String),
    FindRoomById {
        id: String,
        reply: oneshot::Sender<Option<RoomHandle>>,
    },
    FindRoomByName {
        name: String,
        reply: oneshot::Sender<Option<RoomHandle>>,
    },
    CreateRoom {
        name: String,
        private: bool,
        reply: oneshot::Sender<RoomHandle>,
    },
    FindOrCreateRoom {
        name: String,
        invited: bool,
        /// Id to give the room if it has to be created here
        id: Option<String>,
        reply: oneshot::Sender<Option<RoomHandle>>,
    },
    FindUserById {
        id: String,
        reply: oneshot::Sender<Option<UserRef>>,
    },
    Invite {
        target_user_id: String,
        room: RoomRef,
        inviter: UserRef,
    },
    OnlineUsers(oneshot::Sender<Vec<UserRef>>),
    ClientCount(oneshot::Sender<usize>),
    /// Event received on the presence channel, local echo or remote
    Presence { payload: String, message: Message },
}

/// Cloneable entry point to a running hub
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    fn send(&self, command: HubCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| RustyRoomsError::HubUnavailable)
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> HubCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply))?;
        rx.await.map_err(|_| RustyRoomsError::HubUnavailable)
    }

    pub fn register(&self, client: ClientHandle) -> Result<()> {
        self.send(HubCommand::Register(client))
    }

    pub fn unregister(&self, client: ClientHandle) -> Result<()> {
        self.send(HubCommand::Unregister(client))
    }

    /// Enqueue a raw payload to every local connection
    pub fn broadcast(&self, payload: String) -> Result<()> {
        self.send(HubCommand::Broadcast(payload))
    }

    pub async fn find_room_by_id(&self, id: &str) -> Result<Option<RoomHandle>> {
        let id = id.to_string();
        self.request(|reply| HubCommand::FindRoomById { id, reply })
            .await
    }

    /// Running room, or one lazily activated from the room repository
    pub async fn find_room_by_name(&self, name: &str) -> Result<Option<RoomHandle>> {
        let name = name.to_string();
        self.request(|reply| HubCommand::FindRoomByName { name, reply })
            .await
    }

    pub async fn create_room(&self, name: &str, private: bool) -> Result<RoomHandle> {
        let name = name.to_string();
        self.request(|reply| HubCommand::CreateRoom {
            name,
            private,
            reply,
        })
        .await
    }

    /// Atomic find-then-create. Invited callers only get private rooms and
    /// everyone else only public ones; a mismatch yields `None`.
    pub async fn find_or_create_room(
        &self,
        name: &str,
        invited: bool,
    ) -> Result<Option<RoomHandle>> {
        let name = name.to_string();
        self.request(|reply| HubCommand::FindOrCreateRoom {
            name,
            invited,
            id: None,
            reply,
        })
        .await
    }

    /// Join side of an invite: the private room announced by another
    /// instance, run here under the same id unless it already runs
    pub async fn adopt_private_room(&self, room: RoomRef) -> Result<Option<RoomHandle>> {
        self.request(|reply| HubCommand::FindOrCreateRoom {
            name: room.name,
            invited: true,
            id: Some(room.id),
            reply,
        })
        .await
    }

    /// Roster lookup
    pub async fn find_user_by_id(&self, id: &str) -> Result<Option<UserRef>> {
        let id = id.to_string();
        self.request(|reply| HubCommand::FindUserById { id, reply })
            .await
    }

    /// Announce a private room invite on the shared channel
    pub fn invite(&self, target_user_id: String, room: RoomRef, inviter: UserRef) -> Result<()> {
        self.send(HubCommand::Invite {
            target_user_id,
            room,
            inviter,
        })
    }

    /// Distinct identities currently in the roster
    pub async fn online_users(&self) -> Result<Vec<UserRef>> {
        self.request(HubCommand::OnlineUsers).await
    }

    /// Number of locally registered connections
    pub async fn client_count(&self) -> Result<usize> {
        self.request(HubCommand::ClientCount).await
    }
}

pub struct Hub {
    ctx: AppContext,
    clients: HashMap<Uuid, ClientHandle>,
    rooms: HashMap<String, RoomHandle>,
    roster: Roster,
    echoes: EchoFilter,
    presence_live: bool,
    commands: mpsc::UnboundedReceiver<HubCommand>,
}

impl Hub {
    /// Seed the roster, subscribe to the presence channel and spawn the
    /// hub loop. Fails only if the initial user listing fails.
    pub async fn start(ctx: AppContext) -> Result<HubHandle> {
        let users = ctx.users.get_all_users().await?;
        let mut roster = Roster::new();
        for user in &users {
            roster.add(user);
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let presence_live = match ctx.bus.subscribe(PRESENCE_CHANNEL).await {
            Ok(subscription) => {
                tokio::spawn(drain_presence(subscription, commands_tx.clone()));
                true
            }
            Err(e) => {
                error!(
                    "Failed to subscribe to presence channel: {} - presence stays local",
                    e
                );
                false
            }
        };

        let hub = Hub {
            ctx,
            clients: HashMap::new(),
            rooms: HashMap::new(),
            roster,
            echoes: EchoFilter::new(),
            presence_live,
            commands: commands_rx,
        };

        info!("Hub started with {} known users", hub.roster.len());
        tokio::spawn(hub.run());

        Ok(HubHandle {
            commands: commands_tx,
        })
    }

    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            self.handle_command(command).await;
        }
        info!("Hub command channel closed, shutting down");
    }

    async fn handle_command(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register(client) => self.register_client(client).await,
            HubCommand::Unregister(client) => self.unregister_client(client).await,
            HubCommand::Broadcast(payload) => self.broadcast_to_clients(&payload, None),
            HubCommand::FindRoomById { id, reply } => {
                let _ = reply.send(self.find_room_by_id(&id));
            }
            HubCommand::FindRoomByName { name, reply } => {
                let room = self.find_room_by_name(&name).await;
                let _ = reply.send(room);
            }
            HubCommand::CreateRoom {
                name,
                private,
                reply,
            } => {
                let room = self.create_room(name, private, None).await;
                let _ = reply.send(room);
            }
            HubCommand::FindOrCreateRoom {
                name,
                invited,
                id,
                reply,
            } => {
                let room = self.find_or_create_room(name, invited, id).await;
                let _ = reply.send(room);
            }
            HubCommand::FindUserById { id, reply } => {
                let _ = reply.send(self.roster.get(&id).cloned());
            }
            HubCommand::Invite {
                target_user_id,
                room,
                inviter,
            } => {
                let invite = Message::new(Action::JoinRoomPrivate)
                    .with_text(target_user_id)
                    .with_target(room)
                    .with_sender(inviter);
                self.announce(invite, None).await;
            }
            HubCommand::OnlineUsers(reply) => {
                let _ = reply.send(self.roster.unique_users());
            }
            HubCommand::ClientCount(reply) => {
                let _ = reply.send(self.clients.len());
            }
            HubCommand::Presence { payload, message } => self.handle_presence(&payload, message),
        }
    }

    async fn register_client(&mut self, client: ClientHandle) {
        let conn_id = client.conn_id();
        if self.clients.contains_key(&conn_id) {
            return;
        }

        let user = client.user().clone();
        if !self.roster.contains(&user.id) {
            if let Err(e) = self.ctx.users.add_user(&user).await {
                error!("Failed to persist user {}: {}", user.id, e);
            }
        }

        // List before announcing: a newcomer only sees itself if already known
        self.list_online_clients(&client);

        let joined = Message::new(Action::UserJoin).with_sender(UserRef::of(&user));
        self.announce(joined, Some(conn_id)).await;

        self.clients.insert(conn_id, client);

        info!(
            "Client registered: {} ({}), {} local connections",
            user.name,
            conn_id,
            self.clients.len()
        );
    }

    async fn unregister_client(&mut self, client: ClientHandle) {
        let conn_id = client.conn_id();
        if self.clients.remove(&conn_id).is_none() {
            return;
        }
        self.echoes.forget(conn_id);

        let left = Message::new(Action::UserLeft).with_sender(UserRef::of(client.user()));
        self.announce(left, None).await;

        info!(
            "Client unregistered: {} ({}), {} local connections",
            client.user().name,
            conn_id,
            self.clients.len()
        );
    }

    /// Send the newcomer one `user-join` line per distinct known identity,
    /// batched into a single queued payload so a large roster cannot
    /// overflow the outbound queue
    fn list_online_clients(&self, client: &ClientHandle) {
        let mut lines = Vec::new();
        for user in self.roster.unique_users() {
            match Message::new(Action::UserJoin).with_sender(user).encode() {
                Ok(payload) => lines.push(payload),
                Err(e) => error!("Failed to encode roster entry: {}", e),
            }
        }

        if !lines.is_empty() {
            client.send(&lines.join("\n"));
        }
    }

    /// Publish on the presence channel. When the echo cannot come back the
    /// event is applied locally right away.
    async fn announce(&mut self, message: Message, skip_echo_for: Option<Uuid>) {
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode presence event: {}", e);
                return;
            }
        };

        let published = match self.ctx.bus.publish(PRESENCE_CHANNEL, &payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to publish presence event: {} - applying locally only", e);
                false
            }
        };

        if published && self.presence_live {
            if let Some(conn_id) = skip_echo_for {
                self.echoes.expect(payload, conn_id);
            }
        } else {
            self.apply_presence(&payload, message, None);
        }
    }

    fn handle_presence(&mut self, payload: &str, message: Message) {
        let skip = self.echoes.take(payload);
        self.apply_presence(payload, message, skip);
    }

    fn apply_presence(&mut self, payload: &str, message: Message, skip: Option<Uuid>) {
        match message.action {
            Action::UserJoin => {
                if let Some(sender) = &message.sender {
                    self.roster.add(sender);
                }
                self.broadcast_to_clients(payload, skip);
            }
            Action::UserLeft => {
                if let Some(sender) = &message.sender {
                    self.roster.remove(&sender.id);
                }
                self.broadcast_to_clients(payload, skip);
            }
            Action::JoinRoomPrivate => self.deliver_invite(message),
            other => debug!("Ignoring {:?} on presence channel", other),
        }
    }

    /// Ask every local connection of the invited identity to self-join
    fn deliver_invite(&self, message: Message) {
        let (room, inviter) = match (message.target, message.sender) {
            (Some(room), Some(inviter)) => (room, inviter),
            _ => {
                warn!("Dropping invite without target room or sender");
                return;
            }
        };

        for client in self
            .clients
            .values()
            .filter(|c| c.user().id == message.message)
        {
            client.notify(ConnectionEvent::JoinPrivate {
                room: room.clone(),
                inviter: inviter.clone(),
            });
        }
    }

    /// Non-blocking fan-out; a full queue only affects its own connection
    fn broadcast_to_clients(&self, payload: &str, skip: Option<Uuid>) {
        for (conn_id, client) in &self.clients {
            if Some(*conn_id) == skip {
                continue;
            }
            client.send(payload);
        }
    }

    fn find_room_by_id(&self, id: &str) -> Option<RoomHandle> {
        self.rooms.values().find(|room| room.id() == id).cloned()
    }

    /// Public rooms only; private rooms are reached through an invite
    async fn find_room_by_name(&mut self, name: &str) -> Option<RoomHandle> {
        if is_private_room_name(name) {
            return None;
        }
        if let Some(room) = self.rooms.get(name) {
            return Some(room.clone());
        }
        self.run_room_from_repository(name).await
    }

    async fn run_room_from_repository(&mut self, name: &str) -> Option<RoomHandle> {
        match self.ctx.rooms.find_room_by_name(name).await {
            Ok(Some(stored)) => {
                let room =
                    Room::start(stored.id, stored.name, stored.private, self.ctx.bus.clone())
                        .await;
                self.rooms.insert(room.name().to_string(), room.clone());
                Some(room)
            }
            Ok(None) => None,
            Err(e) => {
                error!("Failed to look up room {}: {}", name, e);
                None
            }
        }
    }

    /// Private rooms always carry the private prefix and prefixed names are
    /// always private, so the two kinds never share a name or a channel
    async fn create_room(&mut self, name: String, private: bool, id: Option<String>) -> RoomHandle {
        let private = private || is_private_room_name(&name);
        let name = if private && !is_private_room_name(&name) {
            format!("{}{}", PRIVATE_ROOM_PREFIX, name)
        } else {
            name
        };

        if let Some(room) = self.rooms.get(&name) {
            debug!("Room {} already running", name);
            return room.clone();
        }

        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());

        // Only public rooms are durable
        if !private {
            let stored = StoredRoom {
                id: id.clone(),
                name: name.clone(),
                private,
                created_at: chrono::Utc::now(),
            };
            if let Err(e) = self.ctx.rooms.add_room(&stored).await {
                error!("Failed to persist room {}: {}", name, e);
            }
        }

        let room = Room::start(id, name.clone(), private, self.ctx.bus.clone()).await;
        self.rooms.insert(name, room.clone());
        room
    }

    async fn find_or_create_room(
        &mut self,
        name: String,
        invited: bool,
        id: Option<String>,
    ) -> Option<RoomHandle> {
        if is_private_room_name(&name) != invited {
            debug!(
                "Refusing {} access to room {}",
                if invited { "invited" } else { "uninvited" },
                name
            );
            return None;
        }

        let existing = if invited {
            self.rooms.get(&name).cloned()
        } else {
            self.find_room_by_name(&name).await
        };
        let room = match existing {
            Some(room) => room,
            None => self.create_room(name, invited, id).await,
        };

        // Stored rows are not trusted to agree with the name
        if room.is_private() != invited {
            debug!("Room {} privacy does not match the request", room.name());
            return None;
        }
        Some(room)
    }
}

/// Drain the presence channel into the hub loop, one event per payload,
/// for as long as the subscription lives.
async fn drain_presence(mut subscription: Subscription, hub: mpsc::UnboundedSender<HubCommand>) {
    while let Some(payload) = subscription.next().await {
        let message = match Message::decode(&payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed presence event: {}", e);
                continue;
            }
        };

        if hub.send(HubCommand::Presence { payload, message }).is_err() {
            break;
        }
    }
    warn!("Presence subscription ended");
}
