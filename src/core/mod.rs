//! Core functionality for the messaging hub

pub mod connection;
pub mod echo;
pub mod hub;
pub mod identity;
pub mod message;
pub mod room;
pub mod roster;

// Re-export main components for convenience
pub use connection::{private_room_name, ClientHandle, Connection, ConnectionEvent, ConnectionSettings};
pub use hub::{Hub, HubHandle};
pub use identity::Identifiable;
pub use message::{Action, Message, RoomRef, UserRef};
pub use room::{is_private_room_name, Room, RoomHandle};
pub use roster::Roster;
