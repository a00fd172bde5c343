use crate::error::{AppError, AppResult};
use std::str::FromStr;

/// Longest password accepted, in bytes, before any hashing or query happens.
pub const MAX_PASSWORD_LENGTH: usize = 5000;

/// Password hashing algorithm types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordAlgorithm {
    Bcrypt,
    Argon2i,
    /// Legacy `$6$` crypt
    Sha512Crypt,
    /// Legacy `$5$` crypt
    Sha256Crypt,
    /// Legacy `$1$` crypt
    Md5Crypt,
}

impl Default for PasswordAlgorithm {
    fn default() -> Self {
        Self::Bcrypt
    }
}

impl std::fmt::Display for PasswordAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bcrypt => write!(f, "bcrypt"),
            Self::Argon2i => write!(f, "argon2i"),
            Self::Sha512Crypt => write!(f, "sha512"),
            Self::Sha256Crypt => write!(f, "sha256"),
            Self::Md5Crypt => write!(f, "md5"),
        }
    }
}

impl FromStr for PasswordAlgorithm {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bcrypt" => Ok(Self::Bcrypt),
            "argon2i" => Ok(Self::Argon2i),
            "sha512" => Ok(Self::Sha512Crypt),
            "sha256" => Ok(Self::Sha256Crypt),
            "md5" => Ok(Self::Md5Crypt),
            other => Err(AppError::Hashing(format!(
                "unsupported hash algorithm '{}'",
                other
            ))),
        }
    }
}

impl PasswordAlgorithm {
    /// Resolve the configured algorithm name; unset or empty means bcrypt.
    pub fn from_config(name: Option<&str>) -> AppResult<Self> {
        match name.map(str::trim) {
            None | Some("") => Ok(Self::default()),
            Some(name) => name.parse(),
        }
    }
}

/// Abstract trait for password hashing algorithms
pub trait PasswordHasher: Send + Sync {
    /// Hash a plaintext password
    fn hash_password(&self, password: &str) -> AppResult<String>;

    /// Verify a plaintext password against a hash
    fn verify_password(&self, password: &str, hash: &str) -> AppResult<bool>;

    /// Check if a string is a hash created by this algorithm family
    fn is_hash(&self, value: &str) -> bool;

    /// Get the algorithm identifier
    fn algorithm(&self) -> PasswordAlgorithm;
}

pub mod argon2_hasher;
pub mod bcrypt_hasher;
pub mod crypt_hasher;

pub use argon2_hasher::Argon2iHasher;
pub use bcrypt_hasher::BcryptHasher;
pub use crypt_hasher::CryptHasher;

/// Hashes new passwords with the configured algorithm and verifies stored
/// hashes by the algorithm their own prefix names.
pub struct PasswordManager {
    /// Configured algorithm name, resolved at hash time so that a bad name
    /// only fails the operations that need to hash.
    configured: Option<String>,
    hashers: Vec<Box<dyn PasswordHasher>>,
}

impl Default for PasswordManager {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PasswordManager {
    pub fn new(configured: Option<&str>) -> Self {
        let hashers: Vec<Box<dyn PasswordHasher>> = vec![
            Box::new(BcryptHasher::new()),
            Box::new(Argon2iHasher::new()),
            Box::new(CryptHasher::new(PasswordAlgorithm::Sha512Crypt)),
            Box::new(CryptHasher::new(PasswordAlgorithm::Sha256Crypt)),
            Box::new(CryptHasher::new(PasswordAlgorithm::Md5Crypt)),
        ];

        Self {
            configured: configured.map(str::to_string),
            hashers,
        }
    }

    /// The algorithm new passwords are hashed with.
    pub fn current_algorithm(&self) -> AppResult<PasswordAlgorithm> {
        PasswordAlgorithm::from_config(self.configured.as_deref())
    }

    /// Hash a plaintext password using the configured algorithm
    pub fn hash_password(&self, password: &str) -> AppResult<String> {
        let algorithm = self.current_algorithm()?;

        let hasher = self
            .hashers
            .iter()
            .find(|h| h.algorithm() == algorithm)
            .ok_or_else(|| AppError::Hashing(format!("no hasher for {}", algorithm)))?;

        hasher.hash_password(password)
    }

    /// Verify a plaintext password against any supported hash format.
    ///
    /// A hash in an unknown format never matches.
    pub fn verify_password(&self, password: &str, hash: &str) -> AppResult<bool> {
        match self.hashers.iter().find(|h| h.is_hash(hash)) {
            Some(hasher) => hasher.verify_password(password, hash),
            None => Ok(false),
        }
    }

    /// Detect the algorithm family used for a given hash
    pub fn detect_algorithm(&self, hash: &str) -> Option<PasswordAlgorithm> {
        self.hashers
            .iter()
            .find(|hasher| hasher.is_hash(hash))
            .map(|hasher| hasher.algorithm())
    }
}
