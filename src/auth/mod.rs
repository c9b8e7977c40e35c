//! Authentication and identity module

pub mod password;
pub mod provider;
pub mod token;
pub mod user;

// Re-export main components
pub use password::PasswordPolicy;
pub use provider::{Auth, JwtAuth, SharedAuth};
pub use token::{Claims, TokenManager};
pub use user::{User, UserKind};
