//! Server configuration module
//! Handles dynamic configuration parameters for the messaging hub

use crate::constants::{
    DEFAULT_HOST, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_PING_PERIOD_SECS, DEFAULT_PONG_WAIT_SECS,
    DEFAULT_PORT, DEFAULT_PUBLIC_DIR, DEFAULT_SEND_QUEUE_CAPACITY, DEFAULT_TOKEN_TTL_SECS,
    DEFAULT_WRITE_WAIT_SECS,
};
use crate::error::{Result, RustyRoomsError};
use std::env;
use std::time::Duration;

/// Server configuration parameters
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// JWT secret for token signing/validation
    pub jwt_secret: String,
    /// Lifetime of issued tokens
    pub token_ttl: Duration,
    /// Allow `?name=` connections without a token
    pub allow_anonymous_access: bool,
    /// Directory served at `/`
    pub public_dir: String,
    /// Bound of each connection's outbound queue
    pub send_queue_capacity: usize,
    /// Largest inbound frame accepted from a peer
    pub max_message_size: usize,
    /// Read-inactivity deadline
    pub pong_wait: Duration,
    /// Keepalive probe interval
    pub ping_interval: Duration,
    /// Per-frame write deadline
    pub write_wait: Duration,
    /// TLS configuration
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
    pub enable_tls: bool,
    /// Redis broker for cross-instance fanout; in-process bus when unset
    pub redis_url: Option<String>,
    /// SQLite database file; memory repositories when unset
    pub database_path: Option<String>,
}

impl ServerConfig {
    /// Configuration for tests and local demos. Never validated.
    pub fn for_testing() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            jwt_secret: "unit-tests-only-9f2c1e7a-4b8d-43c2-a1f0-6d5e3b2c1a90".to_string(),
            token_ttl: Duration::from_secs(DEFAULT_TOKEN_TTL_SECS),
            allow_anonymous_access: true,
            public_dir: DEFAULT_PUBLIC_DIR.to_string(),
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            pong_wait: Duration::from_secs(DEFAULT_PONG_WAIT_SECS),
            ping_interval: Duration::from_secs(DEFAULT_PING_PERIOD_SECS),
            write_wait: Duration::from_secs(DEFAULT_WRITE_WAIT_SECS),
            tls_cert_path: None,
            tls_key_path: None,
            enable_tls: false,
            redis_url: None,
            database_path: None,
        }
    }

    fn optional_var(name: &str) -> Option<String> {
        env::var(name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Validate that the JWT secret meets security requirements
    fn validate_jwt_secret(secret: &str) -> Result<()> {
        if secret.len() < 32 {
            return Err(RustyRoomsError::ConfigError(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        // Check for insecure default or example values
        let insecure_patterns = [
            "your-secret-key",
            "change-this",
            "changeme",
            "default",
            "password",
            "12345",
        ];

        for pattern in &insecure_patterns {
            if secret.contains(pattern) {
                return Err(RustyRoomsError::ConfigError(format!(
                    "JWT secret contains insecure pattern '{}'. Please use a secure random secret generated with: openssl rand -base64 32",
                    pattern
                )));
            }
        }

        if secret.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(RustyRoomsError::ConfigError(
                "JWT secret should contain mixed characters (letters, numbers, symbols)".to_string(),
            ));
        }

        Ok(())
    }

    fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
        env::var(name)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn flag_var(name: &str, default: bool) -> bool {
        env::var(name)
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(default)
    }

    /// Load configuration from environment variables if available
    pub fn from_env() -> Result<Self> {
        let host = env::var("RUSTY_ROOMS_HOST").unwrap_or(DEFAULT_HOST.to_string());
        let port = Self::parse_var("RUSTY_ROOMS_PORT", DEFAULT_PORT);

        let jwt_secret = env::var("RUSTY_ROOMS_JWT_SECRET")
            .or_else(|_| env::var("JWT_SECRET"))
            .map_err(|_| {
                RustyRoomsError::ConfigError(
                    "JWT_SECRET environment variable is required. \
                     Generate one with: openssl rand -base64 32"
                        .to_string(),
                )
            })?;
        Self::validate_jwt_secret(&jwt_secret)?;

        let token_ttl_secs = Self::parse_var("RUSTY_ROOMS_TOKEN_TTL", DEFAULT_TOKEN_TTL_SECS);
        let allow_anonymous_access = Self::flag_var("RUSTY_ROOMS_ALLOW_ANONYMOUS", true);
        let public_dir =
            env::var("RUSTY_ROOMS_PUBLIC_DIR").unwrap_or(DEFAULT_PUBLIC_DIR.to_string());

        let send_queue_capacity =
            Self::parse_var("RUSTY_ROOMS_SEND_QUEUE", DEFAULT_SEND_QUEUE_CAPACITY);
        let max_message_size =
            Self::parse_var("RUSTY_ROOMS_MAX_MESSAGE_SIZE", DEFAULT_MAX_MESSAGE_SIZE);
        let pong_wait_secs = Self::parse_var("RUSTY_ROOMS_PONG_WAIT", DEFAULT_PONG_WAIT_SECS);
        let ping_secs = Self::parse_var("RUSTY_ROOMS_PING", pong_wait_secs * 9 / 10);
        let write_wait_secs = Self::parse_var("RUSTY_ROOMS_WRITE_WAIT", DEFAULT_WRITE_WAIT_SECS);

        if send_queue_capacity == 0 {
            return Err(RustyRoomsError::ConfigError(
                "RUSTY_ROOMS_SEND_QUEUE must be greater than zero".to_string(),
            ));
        }

        if ping_secs == 0 || ping_secs >= pong_wait_secs {
            return Err(RustyRoomsError::ConfigError(format!(
                "Ping interval ({}s) must be non-zero and shorter than the pong wait ({}s)",
                ping_secs, pong_wait_secs
            )));
        }

        // TLS configuration
        let enable_tls = Self::flag_var("RUSTY_ROOMS_ENABLE_TLS", false);
        let tls_cert_path = env::var("RUSTY_ROOMS_TLS_CERT_PATH").ok();
        let tls_key_path = env::var("RUSTY_ROOMS_TLS_KEY_PATH").ok();

        if enable_tls {
            match (&tls_cert_path, &tls_key_path) {
                (Some(cert_path), Some(key_path)) => {
                    if !std::path::Path::new(cert_path).exists() {
                        return Err(RustyRoomsError::ConfigError(format!(
                            "TLS certificate file does not exist: {}",
                            cert_path
                        )));
                    }
                    if !std::path::Path::new(key_path).exists() {
                        return Err(RustyRoomsError::ConfigError(format!(
                            "TLS private key file does not exist: {}",
                            key_path
                        )));
                    }
                }
                _ => {
                    return Err(RustyRoomsError::ConfigError(
                        "TLS is enabled but RUSTY_ROOMS_TLS_CERT_PATH or RUSTY_ROOMS_TLS_KEY_PATH is not set".to_string(),
                    ));
                }
            }
        }

        // Backends
        let redis_url = Self::optional_var("RUSTY_ROOMS_REDIS_URL");
        let database_path = Self::optional_var("RUSTY_ROOMS_DATABASE");

        Ok(Self {
            host,
            port,
            jwt_secret,
            token_ttl: Duration::from_secs(token_ttl_secs),
            allow_anonymous_access,
            public_dir,
            send_queue_capacity,
            max_message_size,
            pong_wait: Duration::from_secs(pong_wait_secs),
            ping_interval: Duration::from_secs(ping_secs),
            write_wait: Duration::from_secs(write_wait_secs),
            tls_cert_path,
            tls_key_path,
            enable_tls,
            redis_url,
            database_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_testing_keeps_ping_below_pong_wait() {
        let config = ServerConfig::for_testing();
        assert!(config.ping_interval < config.pong_wait);
        assert_eq!(config.send_queue_capacity, 256);
        assert!(config.allow_anonymous_access);
        assert!(config.redis_url.is_none());
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_blank_backend_vars_are_unset() {
        env::set_var("RUSTY_ROOMS_TEST_BLANK_BACKEND", "  ");
        assert!(ServerConfig::optional_var("RUSTY_ROOMS_TEST_BLANK_BACKEND").is_none());
        env::set_var("RUSTY_ROOMS_TEST_BLANK_BACKEND", "redis://cache:6379");
        assert_eq!(
            ServerConfig::optional_var("RUSTY_ROOMS_TEST_BLANK_BACKEND").as_deref(),
            Some("redis://cache:6379")
        );
        env::remove_var("RUSTY_ROOMS_TEST_BLANK_BACKEND");
    }

    #[test]
    fn test_short_secret_rejected() {
        let result = ServerConfig::validate_jwt_secret("too-short-1");
        assert!(result.is_err());
    }

    #[test]
    fn test_placeholder_secret_rejected() {
        let result =
            ServerConfig::validate_jwt_secret("please-change-this-value-before-deploying-0001");
        assert!(result.unwrap_err().to_string().contains("change-this"));
    }

    #[test]
    fn test_alphabetic_secret_rejected() {
        let result = ServerConfig::validate_jwt_secret("abcdefghijklmnopqrstuvwxyzabcdefghij");
        assert!(result.is_err());
    }

    #[test]
    fn test_random_secret_accepted() {
        assert!(ServerConfig::validate_jwt_secret("q8Zr+1uP0c/7bN2kX4wV9yL6tH3sJ5mA=").is_ok());
    }

    #[test]
    fn test_from_env_requires_secret() {
        env::remove_var("RUSTY_ROOMS_JWT_SECRET");
        env::remove_var("JWT_SECRET");

        let result = ServerConfig::from_env();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("JWT_SECRET"));
    }
}
