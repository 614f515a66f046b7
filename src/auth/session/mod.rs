//! Durable, expiring session storage.
//!
//! Flow Overview:
//! 1) `create` mints a random key and stores only its SHA-256 digest.
//! 2) `get` hides records whose `expires_at <= now`, whether or not they have
//!    been physically evicted yet.
//! 3) `touch` slides `expires_at` to `now + ttl`, never backwards.
//! 4) `destroy_all_for` drops every record owned by an identity (credential change).
//! 5) `evict_expired` only reclaims space; correctness never depends on it.
//!
//! Every operation on a single key is serialized by the backend itself, so the
//! HTTP and WebSocket layers can share one store without lost updates.

mod memory;
mod record;
mod token;

pub use memory::MemorySessionStore;
pub use record::{
    Flash, FlashLevel, SessionMutator, SessionPayload, SessionRecord, FLASH_ATTRIBUTE,
};
pub use token::SessionKey;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::{SessionError, StorageError};

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Allocate a record with a fresh key, `created_at = now`, `expires_at = now + ttl`.
    async fn create(&self, identity: Option<&str>) -> Result<SessionKey, StorageError>;

    /// Live record for `key`, or `None` if unknown or expired.
    async fn get(&self, key: &SessionKey) -> Result<Option<SessionRecord>, StorageError>;

    /// Slide expiry forward and return the resulting `expires_at`, or `None`
    /// if the key is unknown or expired.
    async fn touch(&self, key: &SessionKey) -> Result<Option<DateTime<Utc>>, StorageError>;

    /// Apply `mutator` to the live record for `key`.
    ///
    /// Fails with `SessionError::Absent` when there is no live record.
    async fn update(&self, key: &SessionKey, mutator: SessionMutator) -> Result<(), SessionError>;

    /// Remove the record. Removing an absent key is not an error.
    async fn destroy(&self, key: &SessionKey) -> Result<(), StorageError>;

    /// Remove every record owned by `identity`, returning the count.
    async fn destroy_all_for(&self, identity: &str) -> Result<u64, StorageError>;

    /// Physically remove expired records, returning the count.
    async fn evict_expired(&self) -> Result<u64, StorageError>;

    /// Cheap reachability check for health reporting.
    async fn ping(&self) -> Result<(), StorageError>;
}
