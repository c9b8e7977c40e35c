use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::DEFAULT_TOKEN_TTL_SECS;
use crate::error::{Result, RustyRoomsError};

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Display name
    pub name: String,
    /// Expiration time (as UTC timestamp)
    pub exp: usize,
    /// Issued at (as UTC timestamp)
    pub iat: usize,
}

impl Claims {
    /// Creates claims valid for the default token lifetime
    pub fn new(user_id: String, name: String) -> Self {
        Self::with_ttl(user_id, name, Duration::from_secs(DEFAULT_TOKEN_TTL_SECS))
    }

    /// Creates claims with a custom lifetime
    pub fn with_ttl(user_id: String, name: String, ttl: Duration) -> Self {
        let now = Utc::now().timestamp().max(0) as usize;

        Self {
            sub: user_id,
            name,
            exp: now + ttl.as_secs() as usize,
            iat: now,
        }
    }

    /// Check if the token is expired
    pub fn is_expired(&self) -> bool {
        let now = Utc::now().timestamp().max(0) as usize;
        now > self.exp
    }
}

/// Manages JWT token operations
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenManager {
    /// Creates a new token manager with a secret
    pub fn new(secret: &str) -> Self {
        Self::with_ttl(secret, Duration::from_secs(DEFAULT_TOKEN_TTL_SECS))
    }

    /// Creates a token manager issuing tokens with the given lifetime
    pub fn with_ttl(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
            ttl,
        }
    }

    /// Claims for a user using this manager's lifetime
    pub fn claims_for(&self, user_id: &str, name: &str) -> Claims {
        Claims::with_ttl(user_id.to_string(), name.to_string(), self.ttl)
    }

    /// Generates a JWT token for the given claims
    pub fn generate_token(&self, claims: &Claims) -> Result<String> {
        encode(&Header::default(), claims, &self.encoding_key)
            .map_err(|e| RustyRoomsError::AuthError(format!("Failed to generate token: {}", e)))
    }

    /// Validates and decodes a JWT token
    pub fn validate_token(&self, token: &str) -> Result<TokenData<Claims>> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| RustyRoomsError::AuthError(format!("Invalid token: {}", e)))
    }

    /// Extracts claims from a token string
    pub fn get_claims(&self, token: &str) -> Result<Claims> {
        let token_data = self.validate_token(token)?;
        Ok(token_data.claims)
    }
}

/// Extracts bearer token from Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<String> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}
