//! Authentication provider
//!
//! The hub only sees the `Auth` trait; `JwtAuth` is the default backend
//! combining JWT bearer tokens with argon2 password hashes.

use std::sync::Arc;

use crate::auth::password::{hash_password, verify_password, PasswordPolicy};
use crate::auth::token::TokenManager;
use crate::auth::user::User;
use crate::config::ServerConfig;
use crate::core::identity::Identifiable;
use crate::error::{Result, RustyRoomsError};

/// Credential issuance and validation
pub trait Auth: Send + Sync {
    /// Hash a plain-text password for storage
    fn generate_password(&self, password: &str) -> Result<String>;

    /// Check a plain-text password against a stored hash
    fn compare_password(&self, password: &str, hash: &str) -> Result<bool>;

    /// Issue a bearer token for an identity
    fn create_token(&self, user: &dyn Identifiable) -> Result<String>;

    /// Resolve a bearer token into an authenticated identity
    fn validate_token(&self, token: &str) -> Result<User>;

    /// Build an anonymous identity from a self-declared name
    fn new_anonymous_user(&self, name: &str) -> User;
}

pub type SharedAuth = Arc<dyn Auth>;

/// JWT + argon2 authentication backend
pub struct JwtAuth {
    tokens: TokenManager,
    policy: PasswordPolicy,
}

impl JwtAuth {
    pub fn new(tokens: TokenManager, policy: PasswordPolicy) -> Self {
        Self { tokens, policy }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            TokenManager::with_ttl(&config.jwt_secret, config.token_ttl),
            PasswordPolicy::default(),
        )
    }
}

impl Auth for JwtAuth {
    fn generate_password(&self, password: &str) -> Result<String> {
        hash_password(password, &self.policy)
    }

    fn compare_password(&self, password: &str, hash: &str) -> Result<bool> {
        verify_password(password, hash)
    }

    fn create_token(&self, user: &dyn Identifiable) -> Result<String> {
        let claims = self.tokens.claims_for(user.id(), user.display_name());
        self.tokens.generate_token(&claims)
    }

    fn validate_token(&self, token: &str) -> Result<User> {
        let claims = self.tokens.get_claims(token)?;

        if claims.sub.is_empty() || claims.name.is_empty() {
            return Err(RustyRoomsError::AuthError(
                "Invalid token claims".to_string(),
            ));
        }

        Ok(User::authenticated(claims.sub, claims.name))
    }

    fn new_anonymous_user(&self, name: &str) -> User {
        User::anonymous(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> JwtAuth {
        JwtAuth::new(
            TokenManager::new("provider-tests-4f1d9c2e-8b7a-4e3f"),
            PasswordPolicy::fast(),
        )
    }

    #[test]
    fn test_token_round_trip_resolves_identity() {
        let auth = auth();
        let user = User::authenticated("42".to_string(), "alice".to_string());

        let token = auth.create_token(&user).unwrap();
        let resolved = auth.validate_token(&token).unwrap();

        assert_eq!(resolved, user);
    }

    #[test]
    fn test_token_from_other_secret_rejected() {
        let user = User::authenticated("42".to_string(), "alice".to_string());
        let other = JwtAuth::new(
            TokenManager::new("another-secret-77aa10c3-2b41-4d8e"),
            PasswordPolicy::fast(),
        );

        let token = other.create_token(&user).unwrap();
        assert!(auth().validate_token(&token).is_err());
    }

    #[test]
    fn test_anonymous_users_get_distinct_ids() {
        let auth = auth();
        let a = auth.new_anonymous_user("guest");
        let b = auth.new_anonymous_user("guest");

        assert!(a.is_anonymous());
        assert_eq!(a.name, "guest");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_password_compare() {
        let auth = auth();
        let hash = auth.generate_password("s3cret").unwrap();
        assert!(auth.compare_password("s3cret", &hash).unwrap());
        assert!(!auth.compare_password("wrong", &hash).unwrap());
    }
}
