//! Salted one-way hashing for passwords and OTP codes

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::result::{Error, Result};

/// Default Argon2id cost for short-lived codes
pub const DEFAULT_MEMORY_KIB: u32 = 4096;
pub const DEFAULT_ITERATIONS: u32 = 2;

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashParams {
    pub memory_kib: u32,
    pub iterations: u32,
}

impl Default for HashParams {
    fn default() -> Self {
        Self {
            memory_kib: DEFAULT_MEMORY_KIB,
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

/// Argon2id hasher producing self-describing PHC strings
#[derive(Debug, Clone)]
pub struct SecretHasher {
    params: HashParams,
}

impl SecretHasher {
    pub fn new(params: HashParams) -> Self {
        Self { params }
    }

    fn argon2(&self) -> Result<Argon2<'static>> {
        let params = Params::new(self.params.memory_kib, self.params.iterations, 1, None)
            .map_err(|e| Error::Config(format!("invalid argon2 parameters: {}", e)))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    /// Hash `secret` under a fresh random salt
    pub fn hash(&self, secret: &str) -> Result<String> {
        let salt_bytes: [u8; 16] = rand::thread_rng().gen();
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| Error::Other(format!("failed to encode salt: {}", e)))?;
        let hash = self
            .argon2()?
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| Error::Other(format!("failed to hash secret: {}", e)))?;
        Ok(hash.to_string())
    }

    /// Check `secret` against a stored PHC string.
    ///
    /// The comparison inside argon2 is constant time. A malformed stored
    /// hash never verifies.
    pub fn verify(&self, secret: &str, stored: &str) -> bool {
        let parsed = match PasswordHash::new(stored) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("Stored secret hash is malformed: {}", e);
                return false;
            }
        };
        match self.argon2() {
            Ok(argon2) => argon2.verify_password(secret.as_bytes(), &parsed).is_ok(),
            Err(_) => false,
        }
    }
}

impl Default for SecretHasher {
    fn default() -> Self {
        Self::new(HashParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> SecretHasher {
        SecretHasher::new(HashParams {
            memory_kib: 64,
            iterations: 1,
        })
    }

    #[test]
    fn test_hash_verifies_only_the_original() {
        let hasher = cheap();
        let hash = hasher.hash("482913").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(!hash.contains("482913"));
        assert!(hasher.verify("482913", &hash));
        assert!(!hasher.verify("482914", &hash));
    }

    #[test]
    fn test_same_secret_gets_different_salts() {
        let hasher = cheap();
        let a = hasher.hash("123456").unwrap();
        let b = hasher.hash("123456").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_hash_never_verifies() {
        assert!(!cheap().verify("123456", "not-a-hash"));
    }
}
