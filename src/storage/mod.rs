//! Persistence collaborators for users and rooms

pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::{MemoryRoomRepository, MemoryUserRepository};
pub use sqlite::{SqliteRoomRepository, SqliteStore, SqliteUserRepository};
pub use traits::{
    RoomRepository, SharedRoomRepository, SharedUserRepository, StoredRoom, StoredUser,
    UserRepository,
};
