//! In-memory repository implementations for development and testing
//!
//! Keeps every record in process memory behind async locks. Data is lost on
//! restart, which is acceptable for single-node deployments and tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::traits::*;
use crate::auth::user::User;
use crate::error::{Result, RustyRoomsError};

/// In-memory user storage
#[derive(Default)]
pub struct MemoryUserRepository {
    users: RwLock<HashMap<String, StoredUser>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn add_user(&self, user: &User) -> Result<()> {
        self.users
            .write()
            .await
            .entry(user.id.clone())
            .or_insert_with(|| StoredUser::from_identity(user));
        Ok(())
    }

    async fn add_db_user(
        &self,
        id: String,
        name: String,
        username: String,
        password_hash: String,
    ) -> Result<StoredUser> {
        let mut users = self.users.write().await;

        if users
            .values()
            .any(|u| u.username.as_deref() == Some(username.as_str()))
        {
            return Err(RustyRoomsError::StorageError(format!(
                "Username already taken: {}",
                username
            )));
        }
        if users.contains_key(&id) {
            return Err(RustyRoomsError::StorageError(format!(
                "User id already exists: {}",
                id
            )));
        }

        let user = StoredUser {
            id: id.clone(),
            name,
            username: Some(username),
            password_hash: Some(password_hash),
            created_at: Utc::now(),
        };
        users.insert(id, user.clone());

        Ok(user)
    }

    async fn remove_user(&self, user_id: &str) -> Result<()> {
        self.users.write().await.remove(user_id);
        Ok(())
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<StoredUser>> {
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<StoredUser>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.username.as_deref() == Some(username))
            .cloned())
    }

    async fn get_all_users(&self) -> Result<Vec<StoredUser>> {
        Ok(self.users.read().await.values().cloned().collect())
    }
}

/// In-memory room storage, keyed by room name
#[derive(Default)]
pub struct MemoryRoomRepository {
    rooms: RwLock<HashMap<String, StoredRoom>>,
}

impl MemoryRoomRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted rooms
    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }
}

#[async_trait]
impl RoomRepository for MemoryRoomRepository {
    async fn add_room(&self, room: &StoredRoom) -> Result<()> {
        let mut rooms = self.rooms.write().await;

        if rooms.contains_key(&room.name) {
            return Err(RustyRoomsError::StorageError(format!(
                "Room already exists: {}",
                room.name
            )));
        }

        rooms.insert(room.name.clone(), room.clone());
        Ok(())
    }

    async fn find_room_by_name(&self, name: &str) -> Result<Option<StoredRoom>> {
        Ok(self.rooms.read().await.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_user_is_idempotent() {
        let repo = MemoryUserRepository::new();
        let user = User::authenticated("1".to_string(), "alice".to_string());

        repo.add_user(&user).await.unwrap();
        repo.add_user(&user).await.unwrap();

        assert_eq!(repo.get_all_users().await.unwrap().len(), 1);
        assert_eq!(
            repo.find_user_by_id("1").await.unwrap().map(|u| u.name),
            Some("alice".to_string())
        );
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let repo = MemoryUserRepository::new();
        repo.add_db_user("1".into(), "Bob".into(), "bob".into(), "hash".into())
            .await
            .unwrap();

        let result = repo
            .add_db_user("2".into(), "Bobby".into(), "bob".into(), "hash".into())
            .await;
        assert!(result.is_err());

        let found = repo.find_user_by_username("bob").await.unwrap().unwrap();
        assert_eq!(found.id, "1");
        assert!(repo.find_user_by_username("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_room_lookup_by_name() {
        let repo = MemoryRoomRepository::new();
        let room = StoredRoom {
            id: "r1".to_string(),
            name: "general".to_string(),
            private: false,
            created_at: Utc::now(),
        };

        repo.add_room(&room).await.unwrap();
        assert!(repo.add_room(&room).await.is_err());

        assert_eq!(repo.find_room_by_name("general").await.unwrap(), Some(room));
        assert!(repo.find_room_by_name("random").await.unwrap().is_none());
    }
}
