//! Session key generation and hashing.
//!
//! The raw key only ever lives in the client's cookie and in memory while a
//! request is handled. Backends index records by [`SessionKey::digest`].

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::auth::error::StorageError;

const KEY_BYTES: usize = 32;

/// Opaque, unguessable session identifier handed to clients.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    /// Draw a fresh key from the OS random source.
    ///
    /// # Errors
    /// Returns `StorageError::Entropy` if the OS RNG fails.
    pub fn generate() -> Result<Self, StorageError> {
        let mut bytes = [0u8; KEY_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|err| StorageError::Entropy(err.to_string()))?;
        Ok(Self(Base64UrlUnpadded::encode_string(&bytes)))
    }

    /// Wrap a client-presented value. No validation happens here; unknown keys
    /// simply resolve to nothing.
    #[must_use]
    pub fn from_client(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// SHA-256 of the key; the only form persisted by any backend.
    #[must_use]
    pub fn digest(&self) -> Vec<u8> {
        Sha256::digest(self.0.as_bytes()).to_vec()
    }

    /// Printable digest prefix for log correlation.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let digest = self.digest();
        Base64UrlUnpadded::encode_string(&digest[..6])
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionKey").field(&"***").finish()
    }
}
