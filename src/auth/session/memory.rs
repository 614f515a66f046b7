//! In-process session store.
//!
//! A single async mutex guards the table, which makes every operation
//! linearizable. Nothing awaits while the lock is held.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{SessionKey, SessionMutator, SessionPayload, SessionRecord, SessionStore};
use crate::auth::clock::{self, Clock};
use crate::auth::error::{SessionError, StorageError};

#[derive(Debug)]
struct StoredSession {
    payload: SessionPayload,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl StoredSession {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Default)]
struct Table {
    records: HashMap<Vec<u8>, StoredSession>,
    /// owner identity -> digests, kept in step with `records`.
    owners: HashMap<String, HashSet<Vec<u8>>>,
}

impl Table {
    fn index(&mut self, identity: Option<&str>, digest: &[u8]) {
        if let Some(identity) = identity {
            self.owners
                .entry(identity.to_string())
                .or_default()
                .insert(digest.to_vec());
        }
    }

    fn unindex(&mut self, identity: Option<&str>, digest: &[u8]) {
        let Some(identity) = identity else {
            return;
        };
        if let Some(digests) = self.owners.get_mut(identity) {
            digests.remove(digest);
            if digests.is_empty() {
                self.owners.remove(identity);
            }
        }
    }

    fn remove(&mut self, digest: &[u8]) -> bool {
        match self.records.remove(digest) {
            Some(stored) => {
                self.unindex(stored.payload.identity.as_deref(), digest);
                true
            }
            None => false,
        }
    }
}

pub struct MemorySessionStore {
    table: Mutex<Table>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            table: Mutex::new(Table::default()),
            clock,
            ttl,
        }
    }

    /// Records physically present, expired or not.
    pub async fn len(&self) -> usize {
        self.table.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, identity: Option<&str>) -> Result<SessionKey, StorageError> {
        let now = self.clock.now();
        let mut table = self.table.lock().await;

        for _ in 0..3 {
            let key = SessionKey::generate()?;
            let digest = key.digest();
            if table.records.contains_key(&digest) {
                continue;
            }
            table.records.insert(
                digest.clone(),
                StoredSession {
                    payload: SessionPayload::for_identity(identity.map(str::to_string)),
                    created_at: now,
                    expires_at: clock::add(now, self.ttl),
                },
            );
            table.index(identity, &digest);
            return Ok(key);
        }

        Err(StorageError::Entropy(
            "failed to generate unique session key".to_string(),
        ))
    }

    async fn get(&self, key: &SessionKey) -> Result<Option<SessionRecord>, StorageError> {
        let now = self.clock.now();
        let table = self.table.lock().await;
        Ok(table
            .records
            .get(&key.digest())
            .filter(|stored| stored.is_live(now))
            .map(|stored| SessionRecord {
                key: key.clone(),
                payload: stored.payload.clone(),
                created_at: stored.created_at,
                expires_at: stored.expires_at,
            }))
    }

    async fn touch(&self, key: &SessionKey) -> Result<Option<DateTime<Utc>>, StorageError> {
        let now = self.clock.now();
        let mut table = self.table.lock().await;
        match table.records.get_mut(&key.digest()) {
            Some(stored) if stored.is_live(now) => {
                stored.expires_at = stored.expires_at.max(clock::add(now, self.ttl));
                Ok(Some(stored.expires_at))
            }
            _ => Ok(None),
        }
    }

    async fn update(&self, key: &SessionKey, mutator: SessionMutator) -> Result<(), SessionError> {
        let now = self.clock.now();
        let digest = key.digest();
        let mut table = self.table.lock().await;

        let (before, after) = match table.records.get_mut(&digest) {
            Some(stored) if stored.is_live(now) => {
                let before = stored.payload.identity.clone();
                mutator(&mut stored.payload);
                (before, stored.payload.identity.clone())
            }
            _ => return Err(SessionError::Absent),
        };

        if before != after {
            table.unindex(before.as_deref(), &digest);
            table.index(after.as_deref(), &digest);
        }
        Ok(())
    }

    async fn destroy(&self, key: &SessionKey) -> Result<(), StorageError> {
        let mut table = self.table.lock().await;
        table.remove(&key.digest());
        Ok(())
    }

    async fn destroy_all_for(&self, identity: &str) -> Result<u64, StorageError> {
        let mut table = self.table.lock().await;
        let Some(digests) = table.owners.remove(identity) else {
            return Ok(0);
        };
        let mut removed = 0u64;
        for digest in digests {
            if table.records.remove(&digest).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn evict_expired(&self) -> Result<u64, StorageError> {
        let now = self.clock.now();
        let mut table = self.table.lock().await;
        let expired: Vec<Vec<u8>> = table
            .records
            .iter()
            .filter(|(_, stored)| !stored.is_live(now))
            .map(|(digest, _)| digest.clone())
            .collect();

        let mut removed = 0u64;
        for digest in expired {
            if table.remove(&digest) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use crate::auth::session::Flash;
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(60);

    fn store() -> (Arc<MemorySessionStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::epoch());
        (Arc::new(MemorySessionStore::new(clock.clone(), TTL)), clock)
    }

    #[tokio::test]
    async fn create_then_get_returns_the_same_key() -> Result<(), StorageError> {
        let (store, clock) = store();
        let key = store.create(Some("bob")).await?;
        let record = store.get(&key).await?;
        let record = record.ok_or_else(|| StorageError::Unavailable("missing".into()))?;

        assert_eq!(record.key, key);
        assert_eq!(record.identity(), Some("bob"));
        assert_eq!(record.created_at, clock.now());
        assert_eq!(record.expires_at, clock::add(clock.now(), TTL));
        Ok(())
    }

    #[tokio::test]
    async fn destroy_is_idempotent() -> Result<(), StorageError> {
        let (store, _) = store();
        let key = store.create(Some("bob")).await?;
        store.destroy(&key).await?;
        assert!(store.get(&key).await?.is_none());
        store.destroy(&key).await?;
        store
            .destroy(&SessionKey::from_client("never-issued"))
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn untouched_session_expires() -> Result<(), StorageError> {
        let (store, clock) = store();
        let key = store.create(None).await?;

        clock.advance(TTL - Duration::from_millis(1));
        assert!(store.get(&key).await?.is_some());

        clock.advance(Duration::from_millis(1));
        assert!(store.get(&key).await?.is_none());
        assert_eq!(store.touch(&key).await?, None);
        // Logically gone, physically still present until evicted.
        assert_eq!(store.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn touch_slides_expiry() -> Result<(), StorageError> {
        let (store, clock) = store();
        let key = store.create(Some("bob")).await?;

        for _ in 0..5 {
            clock.advance(TTL / 2);
            assert_eq!(
                store.touch(&key).await?,
                Some(clock::add(clock.now(), TTL))
            );
        }
        let record = store
            .get(&key)
            .await?
            .ok_or_else(|| StorageError::Unavailable("missing".into()))?;
        assert_eq!(record.expires_at, clock::add(clock.now(), TTL));
        Ok(())
    }

    #[tokio::test]
    async fn touch_never_moves_expiry_backwards() -> Result<(), StorageError> {
        let (store, clock) = store();
        let key = store.create(Some("bob")).await?;
        clock.advance(Duration::from_secs(30));
        assert!(store.touch(&key).await?.is_some());
        let later = clock.now();

        clock.set(clock::sub(later, Duration::from_secs(10)));
        assert_eq!(store.touch(&key).await?, Some(clock::add(later, TTL)));
        let record = store
            .get(&key)
            .await?
            .ok_or_else(|| StorageError::Unavailable("missing".into()))?;
        assert_eq!(record.expires_at, clock::add(later, TTL));
        Ok(())
    }

    #[tokio::test]
    async fn update_mutates_live_records_only() -> Result<(), SessionError> {
        let (store, clock) = store();
        let key = store.create(None).await?;
        store
            .update(
                &key,
                Box::new(|payload| {
                    payload.set_flash(&Flash::error("Invalid username or password"));
                    payload.set_attribute("step", json!("verify"));
                }),
            )
            .await?;

        let record = store.get(&key).await?.ok_or(SessionError::Absent)?;
        assert_eq!(record.payload.attribute("step"), Some(&json!("verify")));

        clock.advance(TTL);
        let result = store.update(&key, Box::new(|_| {})).await;
        assert!(matches!(result, Err(SessionError::Absent)));

        let result = store
            .update(&SessionKey::from_client("unknown"), Box::new(|_| {}))
            .await;
        assert!(matches!(result, Err(SessionError::Absent)));
        Ok(())
    }

    #[tokio::test]
    async fn destroy_all_for_only_touches_that_identity() -> Result<(), SessionError> {
        let (store, _) = store();
        let bob_one = store.create(Some("bob")).await?;
        let bob_two = store.create(Some("bob")).await?;
        let alice = store.create(Some("alice")).await?;
        let anonymous = store.create(None).await?;

        // A session that becomes bob's after login is owned by bob too.
        store
            .update(
                &anonymous,
                Box::new(|payload| payload.identity = Some("bob".to_string())),
            )
            .await?;

        assert_eq!(store.destroy_all_for("bob").await?, 3);
        assert!(store.get(&bob_one).await?.is_none());
        assert!(store.get(&bob_two).await?.is_none());
        assert!(store.get(&anonymous).await?.is_none());
        assert!(store.get(&alice).await?.is_some());
        assert_eq!(store.destroy_all_for("bob").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn evict_expired_reclaims_only_stale_records() -> Result<(), StorageError> {
        let (store, clock) = store();
        let stale = store.create(Some("bob")).await?;
        clock.advance(TTL / 2);
        let fresh = store.create(Some("bob")).await?;
        clock.advance(TTL / 2);

        assert_eq!(store.evict_expired().await?, 1);
        assert_eq!(store.len().await, 1);
        assert!(store.get(&stale).await?.is_none());
        assert!(store.get(&fresh).await?.is_some());
        // The owner index no longer references the evicted record.
        assert_eq!(store.destroy_all_for("bob").await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_touches_keep_the_latest_expiry() -> Result<(), StorageError> {
        let (store, clock) = store();
        let key = store.create(Some("bob")).await?;
        clock.advance(Duration::from_secs(45));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move { store.touch(&key).await }));
        }
        for handle in handles {
            let touched = handle
                .await
                .map_err(|err| StorageError::Unavailable(err.to_string()))??;
            assert!(touched.is_some());
        }

        let record = store
            .get(&key)
            .await?
            .ok_or_else(|| StorageError::Unavailable("missing".into()))?;
        assert_eq!(record.expires_at, clock::add(clock.now(), TTL));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_updates_are_not_lost() -> Result<(), SessionError> {
        let (store, _) = store();
        let key = store.create(Some("bob")).await?;

        let mut handles = Vec::new();
        for index in 0..20 {
            let store = store.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update(
                        &key,
                        Box::new(move |payload| {
                            payload.set_attribute(format!("path-{index}"), json!(index));
                        }),
                    )
                    .await
            }));
        }
        for handle in handles {
            handle
                .await
                .map_err(|err| StorageError::Unavailable(err.to_string()))??;
        }

        let record = store.get(&key).await?.ok_or(SessionError::Absent)?;
        assert_eq!(record.payload.attributes.len(), 20);
        Ok(())
    }
}
