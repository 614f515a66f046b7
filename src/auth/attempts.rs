//! Append-only record of login attempts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::error::StorageError;

/// Origin recorded when the client address cannot be resolved.
pub const UNKNOWN_ORIGIN: &str = "unknown";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure,
}

impl AttemptOutcome {
    #[must_use]
    pub const fn from_success(success: bool) -> Self {
        if success {
            Self::Success
        } else {
            Self::Failure
        }
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// One immutable log entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginAttempt {
    pub identity: String,
    pub origin: String,
    pub occurred_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
}

/// Durable attempt history consulted by [`super::guard::LoginGuard`].
///
/// Entries are never edited; `prune` is the only way they leave the log.
#[async_trait]
pub trait AttemptLog: Send + Sync {
    async fn append(&self, attempt: LoginAttempt) -> Result<(), StorageError>;

    /// Attempts for `identity` (and `origin`, when given) with
    /// `occurred_at >= since`, oldest first.
    async fn since(
        &self,
        identity: &str,
        origin: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<LoginAttempt>, StorageError>;

    /// Drop entries older than `before`, returning how many were removed.
    async fn prune(&self, before: DateTime<Utc>) -> Result<u64, StorageError>;
}

/// Process-local attempt log.
#[derive(Debug, Default)]
pub struct MemoryAttemptLog {
    entries: RwLock<HashMap<String, Vec<LoginAttempt>>>,
}

impl MemoryAttemptLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl AttemptLog for MemoryAttemptLog {
    async fn append(&self, attempt: LoginAttempt) -> Result<(), StorageError> {
        let mut entries = self.entries.write().await;
        entries
            .entry(attempt.identity.clone())
            .or_default()
            .push(attempt);
        Ok(())
    }

    async fn since(
        &self,
        identity: &str,
        origin: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<LoginAttempt>, StorageError> {
        let entries = self.entries.read().await;
        let mut matching: Vec<LoginAttempt> = entries
            .get(identity)
            .map(|attempts| {
                attempts
                    .iter()
                    .filter(|attempt| attempt.occurred_at >= since)
                    .filter(|attempt| origin.map_or(true, |origin| attempt.origin == origin))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        // Appends may land out of clock order under contention.
        matching.sort_by_key(|attempt| attempt.occurred_at);
        Ok(matching)
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut entries = self.entries.write().await;
        let mut removed = 0u64;
        entries.retain(|_, attempts| {
            let original = attempts.len();
            attempts.retain(|attempt| attempt.occurred_at >= before);
            removed += (original - attempts.len()) as u64;
            !attempts.is_empty()
        });
        Ok(removed)
    }
}
