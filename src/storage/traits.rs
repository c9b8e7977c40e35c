//! Repository interfaces for pluggable persistence backends
//!
//! The hub treats these as black boxes: every call either succeeds or
//! returns a typed error, and the caller decides whether durability loss
//! is fatal (it never is inside the hub).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::user::User;
use crate::core::identity::Identifiable;
use crate::error::Result;

/// User record. Anonymous and token-only identities carry no credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredUser {
    pub id: String,
    pub name: String,
    pub username: Option<String>,
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StoredUser {
    /// Record for an identity seen on a connection
    pub fn from_identity(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            username: None,
            password_hash: None,
            created_at: Utc::now(),
        }
    }
}

impl Identifiable for StoredUser {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.name
    }
}

/// Room record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRoom {
    pub id: String,
    pub name: String,
    pub private: bool,
    pub created_at: DateTime<Utc>,
}

impl Identifiable for StoredRoom {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.name
    }
}

/// User storage interface
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Persist an identity seen on a connection
    async fn add_user(&self, user: &User) -> Result<()>;

    /// Create a credentialed user; fails if the username is taken
    async fn add_db_user(
        &self,
        id: String,
        name: String,
        username: String,
        password_hash: String,
    ) -> Result<StoredUser>;

    /// Remove a user record
    async fn remove_user(&self, user_id: &str) -> Result<()>;

    /// Get user by ID
    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<StoredUser>>;

    /// Get user by login username
    async fn find_user_by_username(&self, username: &str) -> Result<Option<StoredUser>>;

    /// All known users
    async fn get_all_users(&self) -> Result<Vec<StoredUser>>;
}

/// Room storage interface
#[async_trait]
pub trait RoomRepository: Send + Sync {
    /// Persist a room
    async fn add_room(&self, room: &StoredRoom) -> Result<()>;

    /// Get room by its unique name
    async fn find_room_by_name(&self, name: &str) -> Result<Option<StoredRoom>>;
}

pub type SharedUserRepository = Arc<dyn UserRepository>;
pub type SharedRoomRepository = Arc<dyn RoomRepository>;
