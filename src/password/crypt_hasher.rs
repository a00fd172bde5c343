use super::{PasswordAlgorithm, PasswordHasher};
use crate::error::{AppError, AppResult};
use base64::{
    alphabet,
    engine::{general_purpose, GeneralPurpose},
    Engine as _,
};
use rand::RngCore;

/// Base64 over the `./0-9A-Za-z` alphabet crypt salts are drawn from.
const CRYPT_BASE64: GeneralPurpose = GeneralPurpose::new(&alphabet::CRYPT, general_purpose::NO_PAD);

const SALT_BYTES: usize = 8;

/// MD5-crypt reads at most this many salt characters.
const MD5_MAX_SALT_LEN: usize = 8;

/// crypt(3) signals failure with outputs shorter than this.
const MIN_CRYPT_LENGTH: usize = 13;

/// Legacy crypt(3)-style hasher for the SHA-512, SHA-256 and MD5 schemes.
///
/// Output format: `$<id>$<salt>$<checksum>` with id 6, 5 or 1.
pub struct CryptHasher {
    algorithm: PasswordAlgorithm,
}

impl CryptHasher {
    /// `algorithm` must be one of the three crypt families; anything else
    /// falls back to SHA-512.
    pub fn new(algorithm: PasswordAlgorithm) -> Self {
        let algorithm = match algorithm {
            PasswordAlgorithm::Sha256Crypt | PasswordAlgorithm::Md5Crypt => algorithm,
            _ => PasswordAlgorithm::Sha512Crypt,
        };
        Self { algorithm }
    }

    fn scheme_id(&self) -> &'static str {
        match self.algorithm {
            PasswordAlgorithm::Sha256Crypt => "5",
            PasswordAlgorithm::Md5Crypt => "1",
            _ => "6",
        }
    }

    fn prefix(&self) -> String {
        format!("${}$", self.scheme_id())
    }

    fn generate_salt(&self) -> String {
        let mut bytes = [0u8; SALT_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let mut salt = CRYPT_BASE64.encode(bytes);
        if self.algorithm == PasswordAlgorithm::Md5Crypt {
            salt.truncate(MD5_MAX_SALT_LEN);
        }
        salt
    }

    /// Hash with an explicit `$<id>$<salt>$` setting string.
    ///
    /// pwhash deprecates creating md5 and sha256 crypt hashes; both remain
    /// selectable through `hashAlgorithm`.
    #[allow(deprecated)]
    fn hash_with_setting(&self, setting: &str, password: &str) -> AppResult<String> {
        let hashed = match self.algorithm {
            PasswordAlgorithm::Sha256Crypt => pwhash::sha256_crypt::hash_with(setting, password),
            PasswordAlgorithm::Md5Crypt => pwhash::md5_crypt::hash_with(setting, password),
            _ => pwhash::sha512_crypt::hash_with(setting, password),
        }
        .map_err(|e| AppError::Hashing(format!("{} crypt failed: {}", self.algorithm, e)))?;

        if hashed.len() < MIN_CRYPT_LENGTH {
            return Err(AppError::Hashing(format!(
                "{} crypt returned a failure value",
                self.algorithm
            )));
        }

        Ok(hashed)
    }
}

impl PasswordHasher for CryptHasher {
    fn hash_password(&self, password: &str) -> AppResult<String> {
        let setting = format!("{}{}$", self.prefix(), self.generate_salt());
        self.hash_with_setting(&setting, password)
    }

    fn verify_password(&self, password: &str, hash: &str) -> AppResult<bool> {
        let matches = match self.algorithm {
            PasswordAlgorithm::Sha256Crypt => pwhash::sha256_crypt::verify(password, hash),
            PasswordAlgorithm::Md5Crypt => pwhash::md5_crypt::verify(password, hash),
            _ => pwhash::sha512_crypt::verify(password, hash),
        };
        Ok(matches)
    }

    fn is_hash(&self, value: &str) -> bool {
        value.starts_with(&self.prefix()) && value.len() >= MIN_CRYPT_LENGTH
    }

    fn algorithm(&self) -> PasswordAlgorithm {
        self.algorithm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypt_hash_and_verify() {
        for (algorithm, prefix) in [
            (PasswordAlgorithm::Sha512Crypt, "$6$"),
            (PasswordAlgorithm::Sha256Crypt, "$5$"),
            (PasswordAlgorithm::Md5Crypt, "$1$"),
        ] {
            let hasher = CryptHasher::new(algorithm);
            let hash = hasher.hash_password("TestPassword123!").unwrap();

            assert!(hash.starts_with(prefix), "{}", hash);
            assert!(hasher.is_hash(&hash));
            assert!(hasher.verify_password("TestPassword123!", &hash).unwrap());
            assert!(!hasher.verify_password("WrongPassword", &hash).unwrap());
        }
    }

    #[test]
    fn test_salt_shape() {
        let sha = CryptHasher::new(PasswordAlgorithm::Sha512Crypt);
        let salt = sha.generate_salt();
        assert_eq!(salt.len(), 11);
        assert!(salt
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '/'));

        let md5 = CryptHasher::new(PasswordAlgorithm::Md5Crypt);
        assert_eq!(md5.generate_salt().len(), MD5_MAX_SALT_LEN);
    }

    #[test]
    fn test_known_sha512_vector() {
        // Known answer from the SHA-crypt reference vectors
        let hasher = CryptHasher::new(PasswordAlgorithm::Sha512Crypt);
        let hash = hasher
            .hash_with_setting("$6$saltstring$", "Hello world!")
            .unwrap();
        assert_eq!(
            hash,
            "$6$saltstring$svn8UoSVapNtMuq1ukKS4tPQd8iKwSMHWjl/O817G3uBnIFNjnQJuesI68u4OTLiBFdcbYEdFCoEOfaS35inz1"
        );
    }

    #[test]
    fn test_known_legacy_vectors() {
        let md5 = CryptHasher::new(PasswordAlgorithm::Md5Crypt);
        assert_eq!(
            md5.hash_with_setting("$1$5pZSV9va$", "password").unwrap(),
            "$1$5pZSV9va$azfrPr6af3Fc7dLblQXVa0"
        );

        // Explicit rounds in the setting are honoured
        let sha256 = CryptHasher::new(PasswordAlgorithm::Sha256Crypt);
        let hash = "$5$rounds=11858$WH1ABM5sKhxbkgCK$aTQsjPkz0rBsH3lQlJxw9HDTDXPKBxC0LlVeV69P.t1";
        assert_eq!(sha256.hash_with_setting(hash, "test").unwrap(), hash);
        assert!(sha256.verify_password("test", hash).unwrap());
    }

    #[test]
    fn test_fresh_salt_per_call() {
        let hasher = CryptHasher::new(PasswordAlgorithm::Sha256Crypt);
        let hash1 = hasher.hash_password("same").unwrap();
        let hash2 = hasher.hash_password("same").unwrap();
        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_is_hash_by_prefix() {
        let sha512 = CryptHasher::new(PasswordAlgorithm::Sha512Crypt);
        let md5 = CryptHasher::new(PasswordAlgorithm::Md5Crypt);

        assert!(md5.is_hash("$1$abcdefgh$XXXXXXXXXXXXXXXXXXXXXX"));
        assert!(!sha512.is_hash("$1$abcdefgh$XXXXXXXXXXXXXXXXXXXXXX"));
        assert!(!sha512.is_hash("$6$short"));
        assert!(!sha512.is_hash("$2y$10$R9h/cIPz0gi.URNNX3kh2OPST9/PgBkqquzi.Ss7KIUgO2t0jWMUW"));
    }

    #[test]
    fn test_non_crypt_algorithm_falls_back() {
        let hasher = CryptHasher::new(PasswordAlgorithm::Bcrypt);
        assert_eq!(hasher.algorithm(), PasswordAlgorithm::Sha512Crypt);
    }
}
