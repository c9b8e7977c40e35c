//! Argon2id password hashing in PHC string format

use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;

use crate::error::{Result, RustyRoomsError};

const SALT_LEN: usize = 16;

/// Cost parameters used when hashing new passwords.
/// Verification always uses the parameters encoded in the stored hash.
#[derive(Debug, Clone, Copy)]
pub struct PasswordPolicy {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
    pub output_len: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 1,
            parallelism: 4,
            output_len: 32,
        }
    }
}

impl PasswordPolicy {
    /// Cheap parameters for tests
    pub fn fast() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
            output_len: 32,
        }
    }

    fn hasher(&self) -> Result<Argon2<'static>> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(self.output_len),
        )
        .map_err(|e| RustyRoomsError::AuthError(format!("Invalid argon2 parameters: {}", e)))?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Hash a password with a fresh random salt
pub fn hash_password(password: &str, policy: &PasswordPolicy) -> Result<String> {
    let mut salt_bytes = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt_bytes);

    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| RustyRoomsError::AuthError(format!("Failed to encode salt: {}", e)))?;

    let hash = policy
        .hasher()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| RustyRoomsError::AuthError(format!("Failed to hash password: {}", e)))?;

    Ok(hash.to_string())
}

/// Compare a password against a stored hash.
/// A mismatch is `Ok(false)`; a malformed hash is an error.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| RustyRoomsError::AuthError(format!("Malformed password hash: {}", e)))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => Err(RustyRoomsError::AuthError(format!(
            "Password verification failed: {}",
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("hunter2", &PasswordPolicy::fast()).unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("hunter2", &hash).unwrap());
        assert!(!verify_password("hunter3", &hash).unwrap());
    }

    #[test]
    fn test_salt_differs_per_hash() {
        let policy = PasswordPolicy::fast();
        let a = hash_password("same", &policy).unwrap();
        let b = hash_password("same", &policy).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_hash_is_error() {
        assert!(verify_password("whatever", "not-a-phc-string").is_err());
    }
}
