use super::{PasswordAlgorithm, PasswordHasher};
use crate::error::{AppError, AppResult};
use argon2::{
    password_hash::SaltString, Algorithm, Argon2, Params, PasswordHash,
    PasswordHasher as Argon2PasswordHasher, PasswordVerifier, Version,
};

/// Argon2i password hasher.
///
/// New hashes use 19 MiB of memory, 2 iterations and 1 lane. Verification
/// honours whatever variant and parameters the stored hash names, so
/// `$argon2id$` hashes written by other systems verify too.
pub struct Argon2iHasher {
    argon2: Argon2<'static>,
}

impl Argon2iHasher {
    /// Create a new Argon2i hasher with the parameters below
    pub fn new() -> Self {
        let argon2 = Argon2::new(Algorithm::Argon2i, Version::V0x13, Self::params());
        Self { argon2 }
    }

    /// Parameters for new hashes:
    /// - Memory: 19 MiB = 19 * 1024 KiB = 19456 KiB
    /// - Iterations: 2
    /// - Parallelism: 1
    fn params() -> Params {
        Params::new(
            19456,    // memory cost in KiB (19 MiB)
            2,        // time cost (iterations)
            1,        // parallelism
            Some(32), // output length
        )
        .unwrap_or_default()
    }

    /// Generate a random salt string
    fn generate_salt(&self) -> SaltString {
        SaltString::generate(&mut rand::thread_rng())
    }
}

impl Default for Argon2iHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHasher for Argon2iHasher {
    fn hash_password(&self, password: &str) -> AppResult<String> {
        let salt = self.generate_salt();

        let password_hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AppError::Hashing(format!("argon2i failed: {}", e)))?;

        Ok(password_hash.to_string())
    }

    fn verify_password(&self, password: &str, hash: &str) -> AppResult<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| AppError::Hashing(format!("malformed Argon2 hash: {}", e)))?;

        match self
            .argon2
            .verify_password(password.as_bytes(), &parsed_hash)
        {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AppError::Hashing(format!(
                "Argon2 verification failed: {}",
                e
            ))),
        }
    }

    fn is_hash(&self, value: &str) -> bool {
        // $argon2i$, $argon2d$ or $argon2id$ in PHC string format
        value.starts_with("$argon2") && PasswordHash::new(value).is_ok()
    }

    fn algorithm(&self) -> PasswordAlgorithm {
        PasswordAlgorithm::Argon2i
    }
}
