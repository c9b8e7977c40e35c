use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::identity::Identifiable;

/// How an identity was resolved at upgrade time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserKind {
    /// Resolved from a valid bearer token
    Authenticated,
    /// Self-declared display name, fresh id per connection
    Anonymous,
}

/// Server-resolved identity attached to a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique user identifier
    pub id: String,
    /// Name for display
    pub name: String,
    pub kind: UserKind,
}

impl User {
    /// Identity backed by a validated credential
    pub fn authenticated(id: String, name: String) -> Self {
        Self {
            id,
            name,
            kind: UserKind::Authenticated,
        }
    }

    /// Anonymous identity with a freshly generated id
    pub fn anonymous(name: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            kind: UserKind::Anonymous,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.kind == UserKind::Anonymous
    }
}

impl Identifiable for User {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.name
    }
}
