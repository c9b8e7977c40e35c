//! SQLite repositories for durable single-node deployments
//!
//! One connection is shared by both repositories behind a mutex. Every
//! query runs on the blocking pool so the hub loop never waits on disk.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::traits::*;
use crate::auth::user::User;
use crate::error::{Result, RustyRoomsError};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        username TEXT UNIQUE NULL,
        password TEXT NULL,
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS rooms (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT UNIQUE NOT NULL,
        private INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );
";

/// Shared handle to one SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database file and apply the schema
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                RustyRoomsError::StorageError(format!("Cannot create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        info!("Opened SQLite store at {}", path.display());
        Self::init(conn)
    }

    /// Private database that disappears with the store
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock()?;
            f(&conn)
        })
        .await
        .map_err(|e| RustyRoomsError::StorageError(format!("Storage task failed: {}", e)))?
    }
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<StoredUser> {
    Ok(StoredUser {
        id: row.get(0)?,
        name: row.get(1)?,
        username: row.get(2)?,
        password_hash: row.get(3)?,
        created_at: timestamp(row, 4)?,
    })
}

fn room_from_row(row: &Row<'_>) -> rusqlite::Result<StoredRoom> {
    Ok(StoredRoom {
        id: row.get(0)?,
        name: row.get(1)?,
        private: row.get(2)?,
        created_at: timestamp(row, 3)?,
    })
}

const USER_COLUMNS: &str = "SELECT id, name, username, password, created_at FROM users";

/// SQLite user storage
pub struct SqliteUserRepository {
    store: SqliteStore,
}

impl SqliteUserRepository {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn add_user(&self, user: &User) -> Result<()> {
        let record = StoredUser::from_identity(user);
        self.store
            .run(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO users (id, name, created_at) VALUES (?1, ?2, ?3)",
                    params![record.id, record.name, record.created_at.to_rfc3339()],
                )?;
                Ok(())
            })
            .await
    }

    async fn add_db_user(
        &self,
        id: String,
        name: String,
        username: String,
        password_hash: String,
    ) -> Result<StoredUser> {
        self.store
            .run(move |conn| {
                let taken: Option<String> = conn
                    .query_row(
                        "SELECT id FROM users WHERE username = ?1",
                        params![username],
                        |row| row.get(0),
                    )
                    .optional()?;
                if taken.is_some() {
                    return Err(RustyRoomsError::StorageError(format!(
                        "Username already taken: {}",
                        username
                    )));
                }

                let user = StoredUser {
                    id,
                    name,
                    username: Some(username),
                    password_hash: Some(password_hash),
                    created_at: Utc::now(),
                };
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO users (id, name, username, password, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        user.id,
                        user.name,
                        user.username,
                        user.password_hash,
                        user.created_at.to_rfc3339()
                    ],
                )?;
                if inserted == 0 {
                    return Err(RustyRoomsError::StorageError(format!(
                        "User id already exists: {}",
                        user.id
                    )));
                }
                Ok(user)
            })
            .await
    }

    async fn remove_user(&self, user_id: &str) -> Result<()> {
        let user_id = user_id.to_string();
        self.store
            .run(move |conn| {
                conn.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
                Ok(())
            })
            .await
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<StoredUser>> {
        let user_id = user_id.to_string();
        self.store
            .run(move |conn| {
                let sql = format!("{} WHERE id = ?1", USER_COLUMNS);
                Ok(conn
                    .query_row(&sql, params![user_id], user_from_row)
                    .optional()?)
            })
            .await
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<StoredUser>> {
        let username = username.to_string();
        self.store
            .run(move |conn| {
                let sql = format!("{} WHERE username = ?1", USER_COLUMNS);
                Ok(conn
                    .query_row(&sql, params![username], user_from_row)
                    .optional()?)
            })
            .await
    }

    async fn get_all_users(&self) -> Result<Vec<StoredUser>> {
        self.store
            .run(|conn| {
                let mut stmt = conn.prepare(USER_COLUMNS)?;
                let users = stmt
                    .query_map([], user_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(users)
            })
            .await
    }
}

/// SQLite room storage, unique by room name
pub struct SqliteRoomRepository {
    store: SqliteStore,
}

impl SqliteRoomRepository {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RoomRepository for SqliteRoomRepository {
    async fn add_room(&self, room: &StoredRoom) -> Result<()> {
        let room = room.clone();
        self.store
            .run(move |conn| {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO rooms (id, name, private, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![room.id, room.name, room.private, room.created_at.to_rfc3339()],
                )?;
                if inserted == 0 {
                    return Err(RustyRoomsError::StorageError(format!(
                        "Room already exists: {}",
                        room.name
                    )));
                }
                Ok(())
            })
            .await
    }

    async fn find_room_by_name(&self, name: &str) -> Result<Option<StoredRoom>> {
        let name = name.to_string();
        self.store
            .run(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, name, private, created_at FROM rooms WHERE name = ?1",
                        params![name],
                        room_from_row,
                    )
                    .optional()?)
            })
            .await
    }
}
