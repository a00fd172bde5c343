use super::{PasswordAlgorithm, PasswordHasher};
use crate::error::{AppError, AppResult};
use bcrypt::{hash, verify};

/// Work factor used for new hashes.
pub const BCRYPT_COST: u32 = 10;

/// bcrypt password hasher
///
/// bcrypt is built on the Blowfish cipher. New hashes use the `$2y$` prefix
/// and cost 10; any `$2?$` variant verifies.
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    /// Create a hasher with the default cost (10)
    pub fn new() -> Self {
        Self { cost: BCRYPT_COST }
    }

    /// Create a hasher with a custom cost
    ///
    /// Cost should be between 4 and 31. Each step doubles the work.
    pub fn with_cost(cost: u32) -> AppResult<Self> {
        if !(4..=31).contains(&cost) {
            return Err(AppError::Hashing(
                "bcrypt cost must be between 4 and 31".to_string(),
            ));
        }

        Ok(Self { cost })
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHasher for BcryptHasher {
    fn hash_password(&self, password: &str) -> AppResult<String> {
        hash(password, self.cost)
            .map_err(|e| AppError::Hashing(format!("bcrypt failed: {}", e)))
    }

    fn verify_password(&self, password: &str, hash: &str) -> AppResult<bool> {
        verify(password, hash)
            .map_err(|e| AppError::Hashing(format!("bcrypt verification failed: {}", e)))
    }

    fn is_hash(&self, value: &str) -> bool {
        // $2$, $2a$, $2b$, $2x$ or $2y$, always 60 characters
        value.starts_with("$2") && value.len() == 60 && value.matches('$').count() == 3
    }

    fn algorithm(&self) -> PasswordAlgorithm {
        PasswordAlgorithm::Bcrypt
    }
}
