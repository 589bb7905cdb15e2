//! Salted Argon2id password hashing.

use std::sync::{Arc, OnceLock};

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};

use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
    decoy_hash: Arc<OnceLock<Option<String>>>,
}

impl PasswordHasher {
    pub fn new() -> Self {
        Self::with_params(Params::default())
    }

    /// Cheapest parameters argon2 accepts, so test suites stay fast.
    #[cfg(test)]
    pub fn fast_for_tests() -> Self {
        let params = Params::new(Params::MIN_M_COST, Params::MIN_T_COST, 1, None)
            .unwrap_or_default();
        Self::with_params(params)
    }

    fn with_params(params: Params) -> Self {
        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            decoy_hash: Arc::new(OnceLock::new()),
        }
    }

    pub fn hash(&self, password: &str) -> AppResult<String> {
        let salt = SaltString::generate(&mut OsRng);

        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|error| {
                tracing::error!(error = ?error, "failed to hash password");
                AppError::Internal(format!("failed to hash password: {error}"))
            })?
            .to_string();

        Ok(hash)
    }

    /// Returns false for a wrong password and for an unreadable stored hash alike.
    pub fn verify(&self, password: &str, stored_hash: &str) -> bool {
        let parsed = match PasswordHash::new(stored_hash) {
            Ok(parsed) => parsed,
            Err(error) => {
                tracing::warn!(error = ?error, "stored password hash is not a valid PHC string");
                return false;
            }
        };

        self.argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    /// Verifies against the account's hash, or against a decoy hash when there
    /// is no account so both misses cost one Argon2 verification.
    pub fn verify_account(&self, password: &str, stored_hash: Option<&str>) -> bool {
        match stored_hash {
            Some(stored_hash) => self.verify(password, stored_hash),
            None => {
                if let Some(decoy) = self.decoy_hash() {
                    self.verify(password, decoy);
                }
                false
            }
        }
    }

    fn decoy_hash(&self) -> Option<&str> {
        self.decoy_hash
            .get_or_init(|| self.hash("decoy password for unknown accounts").ok())
            .as_deref()
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}
