//! Rusty Rooms - room-based real-time messaging over WebSocket
//!
//! This library provides the hub, room and connection actors, the
//! pub/sub bridge that lets several server instances share rooms and
//! presence, and the warp routes serving them.

pub mod auth;
pub mod config;
pub mod constants;
pub mod context;
pub mod core;
pub mod error;
pub mod handlers;
pub mod pubsub;
pub mod storage;

// Re-export main components
pub use config::ServerConfig;
pub use context::AppContext;
pub use error::{Result, RustyRoomsError};
