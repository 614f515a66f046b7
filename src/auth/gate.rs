//! The single choke point between a presented session key and an identity.
//!
//! Both the request/response API and the WebSocket layer hold the same
//! `Arc<AuthGate>`; neither reads the session store directly.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, instrument};

use super::error::{with_timeout, SessionError, StorageError};
use super::session::{Flash, SessionKey, SessionStore};

/// An authenticated actor for the duration of one operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub identity: String,
    pub session: SessionKey,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Authentication {
    Authenticated(Principal),
    Unauthenticated,
}

impl Authentication {
    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Self::Authenticated(principal) => Some(principal),
            Self::Unauthenticated => None,
        }
    }

    #[must_use]
    pub fn into_principal(self) -> Option<Principal> {
        match self {
            Self::Authenticated(principal) => Some(principal),
            Self::Unauthenticated => None,
        }
    }
}

pub struct AuthGate {
    store: Arc<dyn SessionStore>,
    timeout: Duration,
}

impl AuthGate {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Resolve `key` to an identity, sliding its expiry on success.
    ///
    /// Absent, expired, anonymous, and unreadable sessions all resolve to
    /// `Unauthenticated`.
    #[instrument(skip_all, fields(session = %key.fingerprint()))]
    pub async fn authenticate(&self, key: &SessionKey) -> Authentication {
        match self.resolve(key).await {
            Ok(Some(principal)) => Authentication::Authenticated(principal),
            Ok(None) => {
                debug!("no live authenticated session");
                Authentication::Unauthenticated
            }
            Err(err) => {
                error!("session lookup failed, treating as unauthenticated: {err}");
                Authentication::Unauthenticated
            }
        }
    }

    async fn resolve(&self, key: &SessionKey) -> Result<Option<Principal>, StorageError> {
        let record = with_timeout(self.timeout, self.store.get(key)).await?;
        let Some(record) = record else {
            return Ok(None);
        };
        let Some(identity) = record.payload.identity else {
            return Ok(None);
        };

        // Expired between the read and the touch: the record is gone.
        let Some(expires_at) = with_timeout(self.timeout, self.store.touch(key)).await? else {
            return Ok(None);
        };

        Ok(Some(Principal {
            identity,
            session: key.clone(),
            expires_at,
        }))
    }

    /// Attach a flash to a live session, authenticated or not.
    ///
    /// # Errors
    /// `SessionError::Absent` when the session is gone.
    pub async fn set_flash(&self, key: &SessionKey, flash: Flash) -> Result<(), SessionError> {
        with_timeout(
            self.timeout,
            self.store.update(
                key,
                Box::new(move |payload| payload.set_flash(&flash)),
            ),
        )
        .await
    }

    /// Remove and return the flash in a single store update, so concurrent
    /// readers cannot both observe it.
    ///
    /// # Errors
    /// `SessionError::Absent` when the session is gone.
    pub async fn take_flash(&self, key: &SessionKey) -> Result<Option<Flash>, SessionError> {
        let (tx, rx) = oneshot::channel();
        with_timeout(
            self.timeout,
            self.store.update(
                key,
                Box::new(move |payload| {
                    let _ = tx.send(payload.take_flash());
                }),
            ),
        )
        .await?;
        Ok(rx.await.ok().flatten())
    }
}
