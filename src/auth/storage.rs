//! Postgres-backed session store, attempt log, and user directory.
//!
//! Timestamps are bound as epoch milliseconds taken from the service clock, so
//! expiry comparisons never depend on the database server's wall clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use super::attempts::{AttemptLog, AttemptOutcome, LoginAttempt};
use super::clock::{self, Clock};
use super::credentials::{UserDirectory, UserProfile};
use super::error::{SessionError, StorageError};
use super::session::{SessionKey, SessionMutator, SessionPayload, SessionRecord, SessionStore};

const SCHEMA: &str = include_str!("../../sql/schema.sql");

/// Create tables and indexes if they are missing.
///
/// # Errors
/// Returns an error if any statement fails.
pub async fn apply_schema(pool: &PgPool) -> Result<(), StorageError> {
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DDL",
        db.statement = "sql/schema.sql"
    );
    sqlx::raw_sql(SCHEMA).execute(pool).instrument(span).await?;
    Ok(())
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn outcome_label(outcome: AttemptOutcome) -> &'static str {
    match outcome {
        AttemptOutcome::Success => "success",
        AttemptOutcome::Failure => "failure",
    }
}

fn db_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

pub struct PgSessionStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { pool, clock, ttl }
    }

    async fn update_payload(
        &self,
        key: &SessionKey,
        mutator: SessionMutator,
    ) -> Result<bool, StorageError> {
        let now = millis(self.clock.now());
        let digest = key.digest();
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent updates of the same session.
        let query = r"
            SELECT payload::text AS payload
            FROM sessions
            WHERE session_hash = $1 AND expires_at_ms > $2
            FOR UPDATE
        ";
        let row = sqlx::query(query)
            .bind(&digest)
            .bind(now)
            .fetch_optional(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await?;

        let Some(row) = row else {
            let _ = tx.rollback().await;
            return Ok(false);
        };

        let encoded: String = row.get("payload");
        let mut payload: SessionPayload = serde_json::from_str(&encoded)?;
        mutator(&mut payload);
        let encoded = serde_json::to_string(&payload)?;

        let query = r"
            UPDATE sessions
            SET payload = $2::jsonb, owner_identity = $3
            WHERE session_hash = $1
        ";
        sqlx::query(query)
            .bind(&digest)
            .bind(encoded)
            .bind(payload.identity.as_deref())
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, identity: Option<&str>) -> Result<SessionKey, StorageError> {
        let now = self.clock.now();
        let expires_at = clock::add(now, self.ttl);
        let payload = serde_json::to_string(&SessionPayload::for_identity(
            identity.map(str::to_string),
        ))?;

        let query = r"
            INSERT INTO sessions
                (session_hash, payload, expires_at_ms, created_at_ms, owner_identity)
            VALUES ($1, $2::jsonb, $3, $4, $5)
        ";

        for _ in 0..3 {
            let key = SessionKey::generate()?;
            let result = sqlx::query(query)
                .bind(key.digest())
                .bind(&payload)
                .bind(millis(expires_at))
                .bind(millis(now))
                .bind(identity)
                .execute(&self.pool)
                .instrument(db_span("INSERT", query))
                .await;

            match result {
                Ok(_) => return Ok(key),
                Err(err) if is_unique_violation(&err) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(StorageError::Entropy(
            "failed to generate unique session key".to_string(),
        ))
    }

    async fn get(&self, key: &SessionKey) -> Result<Option<SessionRecord>, StorageError> {
        let query = r"
            SELECT payload::text AS payload, created_at_ms, expires_at_ms
            FROM sessions
            WHERE session_hash = $1 AND expires_at_ms > $2
        ";
        let row = sqlx::query(query)
            .bind(key.digest())
            .bind(millis(self.clock.now()))
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let encoded: String = row.get("payload");
        Ok(Some(SessionRecord {
            key: key.clone(),
            payload: serde_json::from_str(&encoded)?,
            created_at: from_millis(row.get("created_at_ms")),
            expires_at: from_millis(row.get("expires_at_ms")),
        }))
    }

    async fn touch(&self, key: &SessionKey) -> Result<Option<DateTime<Utc>>, StorageError> {
        let now = self.clock.now();
        let query = r"
            UPDATE sessions
            SET expires_at_ms = GREATEST(expires_at_ms, $3)
            WHERE session_hash = $1 AND expires_at_ms > $2
            RETURNING expires_at_ms
        ";
        let row = sqlx::query(query)
            .bind(key.digest())
            .bind(millis(now))
            .bind(millis(clock::add(now, self.ttl)))
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;
        Ok(row.map(|row| from_millis(row.get("expires_at_ms"))))
    }

    async fn update(&self, key: &SessionKey, mutator: SessionMutator) -> Result<(), SessionError> {
        if self.update_payload(key, mutator).await? {
            Ok(())
        } else {
            Err(SessionError::Absent)
        }
    }

    async fn destroy(&self, key: &SessionKey) -> Result<(), StorageError> {
        let query = "DELETE FROM sessions WHERE session_hash = $1";
        sqlx::query(query)
            .bind(key.digest())
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await?;
        Ok(())
    }

    async fn destroy_all_for(&self, identity: &str) -> Result<u64, StorageError> {
        let query = "DELETE FROM sessions WHERE owner_identity = $1";
        let result = sqlx::query(query)
            .bind(identity)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await?;
        Ok(result.rows_affected())
    }

    async fn evict_expired(&self) -> Result<u64, StorageError> {
        let query = "DELETE FROM sessions WHERE expires_at_ms <= $1";
        let result = sqlx::query(query)
            .bind(millis(self.clock.now()))
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        let query = "SELECT 1";
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(())
    }
}

pub struct PgAttemptLog {
    pool: PgPool,
}

impl PgAttemptLog {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttemptLog for PgAttemptLog {
    async fn append(&self, attempt: LoginAttempt) -> Result<(), StorageError> {
        let query = r"
            INSERT INTO login_attempts (identity, origin, occurred_at_ms, outcome)
            VALUES ($1, $2, $3, $4)
        ";
        sqlx::query(query)
            .bind(&attempt.identity)
            .bind(&attempt.origin)
            .bind(millis(attempt.occurred_at))
            .bind(outcome_label(attempt.outcome))
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await?;
        Ok(())
    }

    async fn since(
        &self,
        identity: &str,
        origin: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<LoginAttempt>, StorageError> {
        // `$2 IS NULL` collapses the origin filter for identity-only scope.
        let query = r"
            SELECT identity, origin, occurred_at_ms, outcome
            FROM login_attempts
            WHERE identity = $1
              AND ($2::text IS NULL OR origin = $2)
              AND occurred_at_ms >= $3
            ORDER BY occurred_at_ms ASC, id ASC
        ";
        let rows = sqlx::query(query)
            .bind(identity)
            .bind(origin)
            .bind(millis(since))
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let outcome: String = row.get("outcome");
                LoginAttempt {
                    identity: row.get("identity"),
                    origin: row.get("origin"),
                    occurred_at: from_millis(row.get("occurred_at_ms")),
                    outcome: AttemptOutcome::from_success(outcome == "success"),
                }
            })
            .collect())
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64, StorageError> {
        let query = "DELETE FROM login_attempts WHERE occurred_at_ms < $1";
        let result = sqlx::query(query)
            .bind(millis(before))
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await?;
        Ok(result.rows_affected())
    }
}

pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        created_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let query = "INSERT INTO users (username, password_hash, created_at_ms) VALUES ($1, $2, $3)";
        let result = sqlx::query(query)
            .bind(username)
            .bind(password_hash)
            .bind(millis(created_at))
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) if is_unique_violation(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn password_hash(&self, username: &str) -> Result<Option<String>, StorageError> {
        let query = "SELECT password_hash FROM users WHERE username = $1";
        let row = sqlx::query(query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(row.map(|row| row.get("password_hash")))
    }

    async fn profile(&self, username: &str) -> Result<Option<UserProfile>, StorageError> {
        let query = r"
            SELECT username, created_at_ms, last_login_ms
            FROM users
            WHERE username = $1
        ";
        let row = sqlx::query(query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(row.map(|row| UserProfile {
            username: row.get("username"),
            created_at: from_millis(row.get("created_at_ms")),
            last_login: row
                .get::<Option<i64>, _>("last_login_ms")
                .map(from_millis),
        }))
    }

    async fn set_password_hash(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<bool, StorageError> {
        let query = r"
            UPDATE users
            SET password_hash = $2, updated_at = NOW()
            WHERE username = $1
        ";
        let result = sqlx::query(query)
            .bind(username)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_login(&self, username: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        let query = "UPDATE users SET last_login_ms = $2 WHERE username = $1";
        sqlx::query(query)
            .bind(username)
            .bind(millis(at))
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn unique_violation_is_detected_by_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError { code: None }));
        assert!(!is_unique_violation(&err));
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn millis_conversion_keeps_precision() {
        let at = DateTime::from_timestamp_millis(1_704_067_200_123).unwrap_or_default();
        assert_eq!(from_millis(millis(at)), at);
        assert_eq!(from_millis(i64::MAX), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn outcome_labels_match_schema_check() {
        assert_eq!(outcome_label(AttemptOutcome::Success), "success");
        assert_eq!(outcome_label(AttemptOutcome::Failure), "failure");
        assert!(SCHEMA.contains("CHECK (outcome IN ('success', 'failure'))"));
    }

    #[test]
    fn schema_declares_every_table() {
        for table in ["users", "sessions", "login_attempts"] {
            assert!(SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")));
        }
    }
}
