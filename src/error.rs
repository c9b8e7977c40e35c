use std::error::Error;
use std::fmt;
use std::sync::PoisonError;

#[derive(Debug)]
pub enum RustyRoomsError {
    // Lock errors
    LockPoisoned(String),

    // Connections errors
    ConnectionError(String),

    // Hub / room actor errors
    HubUnavailable,
    RoomUnavailable(String),

    // Storage errors
    StorageError(String),

    // Pub/sub errors
    BusError(String),

    // Messages errors
    MessageParseError(String),

    // Auth errors
    AuthError(String),
    Unauthorized,
    Forbidden,

    // Validation errors
    ValidationError(String),

    // Configuration errors
    ConfigError(String),
}

impl fmt::Display for RustyRoomsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LockPoisoned(msg) => write!(f, "Lock error: {}", msg),
            Self::ConnectionError(msg) => write!(f, "Connection error: {}", msg),
            Self::HubUnavailable => write!(f, "Hub event loop is not running"),
            Self::RoomUnavailable(name) => write!(f, "Room event loop is not running: {}", name),
            Self::StorageError(msg) => write!(f, "Storage error: {}", msg),
            Self::BusError(msg) => write!(f, "Pub/sub error: {}", msg),
            Self::MessageParseError(msg) => write!(f, "Message parse error: {}", msg),
            Self::AuthError(msg) => write!(f, "Authentication error: {}", msg),
            Self::Unauthorized => write!(f, "Unauthorized access"),
            Self::Forbidden => write!(f, "Forbidden"),
            Self::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for RustyRoomsError {}

// Converting from PoisonError to facilitate poisoned mutex handling
impl<T> From<PoisonError<T>> for RustyRoomsError {
    fn from(err: PoisonError<T>) -> Self {
        RustyRoomsError::LockPoisoned(format!("Mutex poisoned: {}", err))
    }
}

impl From<serde_json::Error> for RustyRoomsError {
    fn from(err: serde_json::Error) -> Self {
        RustyRoomsError::MessageParseError(err.to_string())
    }
}

impl From<redis::RedisError> for RustyRoomsError {
    fn from(err: redis::RedisError) -> Self {
        RustyRoomsError::BusError(err.to_string())
    }
}

impl From<rusqlite::Error> for RustyRoomsError {
    fn from(err: rusqlite::Error) -> Self {
        RustyRoomsError::StorageError(err.to_string())
    }
}

// Generic result type for RustyRooms
pub type Result<T> = std::result::Result<T, RustyRoomsError>;
