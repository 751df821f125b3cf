//! Password hashing and verification.
//!
//! New credentials are hashed with the configured [`CredentialHasher`].
//! Verification reads the scheme from the stored hash itself, so a store may
//! hold a mix of bcrypt and argon2 hashes.

use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use std::str::FromStr;

const BCRYPT_PREFIXES: [&str; 4] = ["$2a$", "$2b$", "$2x$", "$2y$"];
const ARGON2_PREFIX: &str = "$argon2";

pub trait CredentialHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String>;

    fn scheme(&self) -> Scheme;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Bcrypt,
    Argon2,
}

impl Scheme {
    /// Scheme of a stored hash, or `None` for anything unrecognised.
    pub fn detect(stored: &str) -> Option<Scheme> {
        if BCRYPT_PREFIXES.iter().any(|p| stored.starts_with(p)) {
            Some(Scheme::Bcrypt)
        } else if stored.starts_with(ARGON2_PREFIX) {
            Some(Scheme::Argon2)
        } else {
            None
        }
    }
}

impl FromStr for Scheme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "bcrypt" => Ok(Scheme::Bcrypt),
            "argon2" | "argon2id" => Ok(Scheme::Argon2),
            other => Err(anyhow!("Unknown password scheme '{}'", other)),
        }
    }
}

pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self::new(bcrypt::DEFAULT_COST)
    }
}

impl CredentialHasher for BcryptHasher {
    fn hash(&self, password: &str) -> Result<String> {
        bcrypt::hash(password, self.cost).context("Failed to hash password with bcrypt")
    }

    fn scheme(&self) -> Scheme {
        Scheme::Bcrypt
    }
}

pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| anyhow!("Invalid argon2 parameters: {}", e))?;
        Ok(Self { params })
    }
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone());
        let hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow!("Failed to hash password with argon2: {}", e))?;
        Ok(hash.to_string())
    }

    fn scheme(&self) -> Scheme {
        Scheme::Argon2
    }
}

pub fn hasher_for(scheme: Scheme, bcrypt_cost: u32) -> Box<dyn CredentialHasher> {
    match scheme {
        Scheme::Bcrypt => Box::new(BcryptHasher::new(bcrypt_cost)),
        Scheme::Argon2 => Box::new(Argon2Hasher::default()),
    }
}

/// Check `password` against a stored hash of either scheme.
///
/// Unrecognised stored values never verify.
pub fn verify_password(password: &str, stored: &str) -> Result<bool> {
    match Scheme::detect(stored) {
        Some(Scheme::Bcrypt) => {
            bcrypt::verify(password, stored).context("Failed to verify bcrypt hash")
        }
        Some(Scheme::Argon2) => {
            let parsed = PasswordHash::new(stored)
                .map_err(|e| anyhow!("Failed to parse argon2 hash: {}", e))?;
            Ok(Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok())
        }
        None => Ok(false),
    }
}
