//! Application context built once at startup and handed to every component

use log::info;
use std::sync::Arc;

use crate::auth::{JwtAuth, SharedAuth};
use crate::config::ServerConfig;
use crate::error::Result;
use crate::pubsub::{MemoryBus, RedisBus, SharedPubSub};
use crate::storage::{
    MemoryRoomRepository, MemoryUserRepository, SharedRoomRepository, SharedUserRepository,
    SqliteRoomRepository, SqliteStore, SqliteUserRepository,
};

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub auth: SharedAuth,
    pub users: SharedUserRepository,
    pub rooms: SharedRoomRepository,
    pub bus: SharedPubSub,
}

impl AppContext {
    pub fn new(
        config: ServerConfig,
        auth: SharedAuth,
        users: SharedUserRepository,
        rooms: SharedRoomRepository,
        bus: SharedPubSub,
    ) -> Self {
        Self {
            config: Arc::new(config),
            auth,
            users,
            rooms,
            bus,
        }
    }

    /// Context for the configured backends: SQLite when a database path is
    /// set, Redis when a broker URL is set, in-process otherwise
    pub async fn from_config(config: ServerConfig) -> Result<Self> {
        let auth = Arc::new(JwtAuth::from_config(&config));

        let (users, rooms): (SharedUserRepository, SharedRoomRepository) =
            match &config.database_path {
                Some(path) => {
                    let store = SqliteStore::open(path)?;
                    (
                        Arc::new(SqliteUserRepository::new(store.clone())),
                        Arc::new(SqliteRoomRepository::new(store)),
                    )
                }
                None => {
                    info!("No database configured, users and rooms are kept in memory");
                    (
                        Arc::new(MemoryUserRepository::new()),
                        Arc::new(MemoryRoomRepository::new()),
                    )
                }
            };

        let bus: SharedPubSub = match &config.redis_url {
            Some(url) => Arc::new(RedisBus::connect(url).await?),
            None => {
                info!("No redis URL configured, fanout stays within this process");
                Arc::new(MemoryBus::new())
            }
        };

        Ok(Self::new(config, auth, users, rooms, bus))
    }

    /// Single-node context: memory repositories, in-process bus, JWT auth
    pub fn in_memory(config: ServerConfig) -> Self {
        let auth = Arc::new(JwtAuth::from_config(&config));
        Self::new(
            config,
            auth,
            Arc::new(MemoryUserRepository::new()),
            Arc::new(MemoryRoomRepository::new()),
            Arc::new(MemoryBus::new()),
        )
    }
}
