//! Hashing utility for hashing and verifying passwords
//!
//! Every user record stores the scheme its hash was produced under;
//! verification dispatches on that tag so legacy accounts keep working.
//! New hashes are always produced with [`PasswordScheme::DEFAULT`].

use argon2::{
    password_hash::{rand_core::OsRng, PasswordVerifier, SaltString},
    Argon2, PasswordHash, PasswordHasher,
};
use log::warn;
use md5::{Digest, Md5};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest salt stored alongside legacy hashes
pub const MAXIMUM_SALT_SIZE: usize = 16;

/// Scheme tag recorded on each user record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PasswordScheme {
    /// Test only. Verification works but logs a warning.
    Plaintext = 0,
    /// Legacy XOR against the salt. Verify-only, never selected for
    /// new hashes.
    XorSalt = 1,
    /// Legacy salted MD5
    Md5Salt = 2,
    /// Default for all newly created hashes
    Bcrypt = 3,
    /// Opt-in strong hashing
    Argon2 = 4,
}

impl PasswordScheme {
    pub const DEFAULT: PasswordScheme = PasswordScheme::Bcrypt;

    pub fn from_tag(value: u8) -> Option<PasswordScheme> {
        Some(match value {
            0 => PasswordScheme::Plaintext,
            1 => PasswordScheme::XorSalt,
            2 => PasswordScheme::Md5Salt,
            3 => PasswordScheme::Bcrypt,
            4 => PasswordScheme::Argon2,
            _ => return None,
        })
    }
}

#[derive(Debug, Error)]
pub enum HashError {
    #[error("password cannot be empty")]
    EmptyPassword,
    #[error("scheme cannot be used for new hashes")]
    WriteForbidden,
    #[error("failed to produce hash: {0}")]
    Backend(String),
}

/// Generates a fresh random salt for a new hash
pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; MAXIMUM_SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Hashes the provided password under the requested scheme returning the
/// stored hash string. Legacy verify-only schemes are refused.
pub fn hash_password(
    password: &str,
    salt: &[u8],
    scheme: PasswordScheme,
) -> Result<String, HashError> {
    if password.is_empty() {
        return Err(HashError::EmptyPassword);
    }

    match scheme {
        PasswordScheme::Plaintext => {
            warn!("storing a plaintext password; test configurations only");
            Ok(password.to_string())
        }
        // XOR+SALT hashes exist only in migrated records
        PasswordScheme::XorSalt => Err(HashError::WriteForbidden),
        PasswordScheme::Md5Salt => {
            let mut hasher = Md5::new();
            hasher.update(password.as_bytes());
            hasher.update(salt);
            Ok(hex_string(&hasher.finalize()))
        }
        PasswordScheme::Bcrypt => bcrypt::hash(password, bcrypt::DEFAULT_COST)
            .map_err(|err| HashError::Backend(err.to_string())),
        PasswordScheme::Argon2 => {
            let salt = SaltString::generate(&mut OsRng);
            let argon2 = Argon2::default();
            argon2
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|err| HashError::Backend(err.to_string()))
        }
    }
}

/// Verifies the provided password against a stored hash, dispatching on
/// the scheme recorded with the user
pub fn verify_password(
    password: &str,
    hash: &str,
    salt: &[u8],
    scheme: PasswordScheme,
) -> bool {
    match scheme {
        PasswordScheme::Plaintext => {
            warn!("verifying against a plaintext password record");
            constant_time_eq(password.as_bytes(), hash.as_bytes())
        }
        PasswordScheme::XorSalt => {
            if salt.is_empty() {
                return false;
            }
            let mixed: Vec<u8> = password
                .bytes()
                .enumerate()
                .map(|(i, b)| b ^ salt[i % salt.len()])
                .collect();
            constant_time_eq(hex_string(&mixed).as_bytes(), hash.as_bytes())
        }
        PasswordScheme::Md5Salt => {
            let mut hasher = Md5::new();
            hasher.update(password.as_bytes());
            hasher.update(salt);
            constant_time_eq(hex_string(&hasher.finalize()).as_bytes(), hash.as_bytes())
        }
        PasswordScheme::Bcrypt => bcrypt::verify(password, hash).unwrap_or(false),
        PasswordScheme::Argon2 => {
            let hash = match PasswordHash::new(hash) {
                Ok(value) => value,
                _ => return false,
            };
            let argon2 = Argon2::default();
            argon2.verify_password(password.as_bytes(), &hash).is_ok()
        }
    }
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Comparison that doesn't short-circuit on the first mismatching byte
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_bcrypt_round_trip() {
        let salt = generate_salt();
        let hash = hash_password("hunter2", &salt, PasswordScheme::Bcrypt).unwrap();
        assert!(verify_password("hunter2", &hash, &salt, PasswordScheme::Bcrypt));
        assert!(!verify_password("hunter3", &hash, &salt, PasswordScheme::Bcrypt));
    }

    #[test]
    fn test_md5_round_trip() {
        let salt = generate_salt();
        let hash = hash_password("legacy-pass", &salt, PasswordScheme::Md5Salt).unwrap();
        assert!(verify_password(
            "legacy-pass",
            &hash,
            &salt,
            PasswordScheme::Md5Salt
        ));
        assert!(!verify_password("other", &hash, &salt, PasswordScheme::Md5Salt));
    }

    #[test]
    fn test_argon2_round_trip() {
        let hash = hash_password("secret", &[], PasswordScheme::Argon2).unwrap();
        assert!(verify_password("secret", &hash, &[], PasswordScheme::Argon2));
        assert!(!verify_password("wrong", &hash, &[], PasswordScheme::Argon2));
    }

    #[test]
    fn test_xor_is_verify_only() {
        let salt = generate_salt();
        assert!(matches!(
            hash_password("pw", &salt, PasswordScheme::XorSalt),
            Err(HashError::WriteForbidden)
        ));

        // Hand-build a legacy record and check verification still works
        let mixed: Vec<u8> = "pw"
            .bytes()
            .enumerate()
            .map(|(i, b)| b ^ salt[i % salt.len()])
            .collect();
        let stored = super::hex_string(&mixed);
        assert!(verify_password("pw", &stored, &salt, PasswordScheme::XorSalt));
        assert!(!verify_password("px", &stored, &salt, PasswordScheme::XorSalt));
    }
}
