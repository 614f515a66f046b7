//! Error types shared by the attempt log and the session store.

use std::future::Future;
use std::time::Duration;

/// Any failure reading or writing durable auth state.
///
/// Callers must treat this as "state unknown" and fail closed.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to encode session payload: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to generate session key: {0}")]
    Entropy(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found or expired")]
    Absent,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Run a store operation with a caller-side deadline.
///
/// An elapsed deadline is reported as [`StorageError::Timeout`].
pub(crate) async fn with_timeout<T, E, F>(limit: Duration, operation: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<StorageError>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout(limit).into()),
    }
}
