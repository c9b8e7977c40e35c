// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const WS_PATH: &str = "ws";
pub const DEFAULT_PUBLIC_DIR: &str = "./public";

/// Shared pub/sub channel carrying presence and invite announcements
pub const PRESENCE_CHANNEL: &str = "general";
/// Prefix of every room's pub/sub channel
pub const ROOM_CHANNEL_PREFIX: &str = "room:";
/// Reserved prefix of private room names; `join-room` refuses it
pub const PRIVATE_ROOM_PREFIX: &str = "private:";

// Connection timing constants (seconds)
/// Max wait time when writing a frame to the peer
pub const DEFAULT_WRITE_WAIT_SECS: u64 = 10;
/// Max time without any inbound frame (pong included) before the peer is considered gone
pub const DEFAULT_PONG_WAIT_SECS: u64 = 60;
/// Keepalive interval, must stay below the pong wait
pub const DEFAULT_PING_PERIOD_SECS: u64 = DEFAULT_PONG_WAIT_SECS * 9 / 10;

// Connection sizing constants
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10_000;
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 256;

/// Token lifetime: one week
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 604_800;

/// Per-channel buffer of the in-process bus
pub const BUS_CHANNEL_CAPACITY: usize = 1024;
