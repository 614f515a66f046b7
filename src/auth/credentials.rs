//! Credential capabilities consumed by the login flow: password hashing,
//! the user directory, and the password policy.

use argon2::password_hash::{
    PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString,
};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::error::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error("invalid hashing parameters: {0}")]
    Params(String),
}

/// Opaque `hash` / `verify` capability.
pub trait PasswordHasher: Send + Sync {
    /// # Errors
    /// Returns `CredentialError::Hashing` if the hash cannot be produced.
    fn hash(&self, plaintext: &str) -> Result<String, CredentialError>;

    fn verify(&self, plaintext: &str, hash: &str) -> bool;

    /// A well-formed hash no password is expected to match. Verified against
    /// for unknown identities so both paths cost the same.
    fn decoy_hash(&self) -> &str;
}

/// Argon2id with PHC-string output.
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
    decoy: String,
}

impl Argon2Hasher {
    /// Argon2id with the crate's recommended default cost.
    ///
    /// # Errors
    /// Returns an error if the decoy hash cannot be produced.
    pub fn new() -> Result<Self, CredentialError> {
        Self::from_argon2(Argon2::default())
    }

    /// Argon2id with explicit memory (KiB) and iteration cost.
    ///
    /// # Errors
    /// Returns `CredentialError::Params` for parameters argon2 rejects.
    pub fn with_cost(memory_kib: u32, iterations: u32) -> Result<Self, CredentialError> {
        let params = Params::new(memory_kib, iterations, 1, None)
            .map_err(|err| CredentialError::Params(err.to_string()))?;
        Self::from_argon2(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    fn from_argon2(argon2: Argon2<'static>) -> Result<Self, CredentialError> {
        let mut hasher = Self {
            argon2,
            decoy: String::new(),
        };
        let mut filler = [0u8; 24];
        OsRng.fill_bytes(&mut filler);
        hasher.decoy = hasher.hash(&Base64::encode_string(&filler))?;
        Ok(hasher)
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, plaintext: &str) -> Result<String, CredentialError> {
        let mut salt = [0u8; 16];
        OsRng
            .try_fill_bytes(&mut salt)
            .map_err(|err| CredentialError::Hashing(err.to_string()))?;
        let salt =
            SaltString::encode_b64(&salt).map_err(|err| CredentialError::Hashing(err.to_string()))?;
        self.argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| CredentialError::Hashing(err.to_string()))
    }

    fn verify(&self, plaintext: &str, hash: &str) -> bool {
        PasswordHash::new(hash).is_ok_and(|parsed| {
            self.argon2
                .verify_password(plaintext.as_bytes(), &parsed)
                .is_ok()
        })
    }

    fn decoy_hash(&self) -> &str {
        &self.decoy
    }
}

/// External password validator capability.
pub trait PasswordPolicy: Send + Sync {
    /// # Errors
    /// Returns every rule the password breaks.
    fn check(&self, password: &str) -> Result<(), Vec<String>>;
}

/// Length bounds only; anything richer belongs to a dedicated validator.
#[derive(Clone, Copy, Debug)]
pub struct LengthPolicy {
    pub min: usize,
    pub max: usize,
}

impl Default for LengthPolicy {
    fn default() -> Self {
        Self { min: 8, max: 1024 }
    }
}

impl PasswordPolicy for LengthPolicy {
    fn check(&self, password: &str) -> Result<(), Vec<String>> {
        let length = password.chars().count();
        let mut problems = Vec::new();
        if length < self.min {
            problems.push(format!("must be at least {} characters", self.min));
        }
        if length > self.max {
            problems.push(format!("must be at most {} characters", self.max));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

/// Public account details, never including the password hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserProfile {
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// Username -> password hash lookup and maintenance.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Returns `false` if the username is already taken.
    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        created_at: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    async fn password_hash(&self, username: &str) -> Result<Option<String>, StorageError>;

    async fn profile(&self, username: &str) -> Result<Option<UserProfile>, StorageError>;

    /// Returns `false` if the user does not exist.
    async fn set_password_hash(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<bool, StorageError>;

    async fn record_login(&self, username: &str, at: DateTime<Utc>) -> Result<(), StorageError>;
}

#[derive(Clone, Debug)]
struct UserEntry {
    password_hash: String,
    created_at: DateTime<Utc>,
    last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<String, UserEntry>>,
}

impl MemoryUserDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn last_login(&self, username: &str) -> Option<DateTime<Utc>> {
        self.users
            .read()
            .await
            .get(username)
            .and_then(|entry| entry.last_login)
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        created_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut users = self.users.write().await;
        if users.contains_key(username) {
            return Ok(false);
        }
        users.insert(
            username.to_string(),
            UserEntry {
                password_hash: password_hash.to_string(),
                created_at,
                last_login: None,
            },
        );
        Ok(true)
    }

    async fn profile(&self, username: &str) -> Result<Option<UserProfile>, StorageError> {
        Ok(self.users.read().await.get(username).map(|entry| UserProfile {
            username: username.to_string(),
            created_at: entry.created_at,
            last_login: entry.last_login,
        }))
    }

    async fn password_hash(&self, username: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .users
            .read()
            .await
            .get(username)
            .map(|entry| entry.password_hash.clone()))
    }

    async fn set_password_hash(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<bool, StorageError> {
        let mut users = self.users.write().await;
        Ok(users.get_mut(username).map_or(false, |entry| {
            entry.password_hash = password_hash.to_string();
            true
        }))
    }

    async fn record_login(&self, username: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        if let Some(entry) = self.users.write().await.get_mut(username) {
            entry.last_login = Some(at);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> Result<Argon2Hasher, CredentialError> {
        Argon2Hasher::with_cost(8, 1)
    }

    #[test]
    fn argon2_round_trip() -> Result<(), CredentialError> {
        let hasher = hasher()?;
        let hash = hasher.hash("correct horse")?;
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("correct horse", &hash));
        assert!(!hasher.verify("battery staple", &hash));
        Ok(())
    }

    #[test]
    fn argon2_salts_every_hash() -> Result<(), CredentialError> {
        let hasher = hasher()?;
        assert_ne!(hasher.hash("same")?, hasher.hash("same")?);
        Ok(())
    }

    #[test]
    fn verify_rejects_garbage_hashes() -> Result<(), CredentialError> {
        let hasher = hasher()?;
        assert!(!hasher.verify("anything", "not-a-phc-string"));
        assert!(!hasher.verify("anything", ""));
        Ok(())
    }

    #[test]
    fn decoy_hash_is_well_formed() -> Result<(), CredentialError> {
        let hasher = hasher()?;
        assert!(PasswordHash::new(hasher.decoy_hash()).is_ok());
        assert!(!hasher.verify("", hasher.decoy_hash()));
        Ok(())
    }

    #[test]
    fn with_cost_rejects_invalid_params() {
        assert!(matches!(
            Argon2Hasher::with_cost(1, 1),
            Err(CredentialError::Params(_))
        ));
    }

    #[test]
    fn length_policy_reports_problems() {
        let policy = LengthPolicy::default();
        assert!(policy.check("long enough").is_ok());
        let problems = policy.check("short").err().unwrap_or_default();
        assert_eq!(problems, vec!["must be at least 8 characters".to_string()]);
    }

    #[tokio::test]
    async fn memory_directory_create_lookup_update() -> Result<(), StorageError> {
        let directory = MemoryUserDirectory::new();
        let created = Utc::now();
        assert!(directory.create_user("bob", "h1", created).await?);
        assert!(!directory.create_user("bob", "h2", created).await?);
        assert_eq!(directory.password_hash("bob").await?, Some("h1".to_string()));
        assert_eq!(directory.password_hash("Bob").await?, None);

        assert!(directory.set_password_hash("bob", "h3").await?);
        assert!(!directory.set_password_hash("carol", "h3").await?);
        assert_eq!(directory.password_hash("bob").await?, Some("h3".to_string()));

        let at = Utc::now();
        directory.record_login("bob", at).await?;
        assert_eq!(directory.last_login("bob").await, Some(at));
        assert_eq!(
            directory.profile("bob").await?,
            Some(UserProfile {
                username: "bob".to_string(),
                created_at: created,
                last_login: Some(at),
            })
        );
        assert_eq!(directory.profile("carol").await?, None);
        Ok(())
    }
}
