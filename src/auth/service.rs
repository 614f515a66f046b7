//! Login, logout, registration, and password change orchestration.
//!
//! Flow Overview (login):
//! 1) `LoginGuard::admit` serializes on the lockout key and short-circuits
//!    locked keys before any credential work happens.
//! 2) The password is verified off the async runtime. Unknown users are
//!    verified against a decoy hash so both paths cost the same.
//! 3) The outcome is appended to the attempt log, releasing the key.
//! 4) On success a fresh session is created and its key returned.
//!
//! Password change verifies the current password through the same admission,
//! so a stolen session cannot be used to guess it without tripping the lockout.

use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::clock::Clock;
use super::config::AuthConfig;
use super::credentials::{
    CredentialError, LengthPolicy, PasswordHasher, PasswordPolicy, UserDirectory, UserProfile,
};
use super::error::{with_timeout, StorageError};
use super::gate::{AuthGate, Authentication};
use super::guard::{Admission, LoginGuard};
use super::session::{SessionKey, SessionStore};

#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    /// Unknown identity and wrong password are deliberately indistinguishable.
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("too many failed attempts")]
    LockedOut { remaining: Duration },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Hashing(#[from] CredentialError),
}

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("username must be 3-32 characters of letters, digits, '.', '_' or '-'")]
    InvalidUsername,
    #[error("password rejected: {}", .0.join(", "))]
    WeakPassword(Vec<String>),
    #[error("username already taken")]
    Conflict,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Hashing(#[from] CredentialError),
}

#[derive(Debug, thiserror::Error)]
pub enum PasswordChangeError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("current password is incorrect")]
    InvalidCredentials,
    #[error("too many failed attempts")]
    LockedOut { remaining: Duration },
    #[error("password rejected: {}", .0.join(", "))]
    WeakPassword(Vec<String>),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Hashing(#[from] CredentialError),
}

/// Result of a successful login or password change.
#[derive(Debug)]
pub struct IssuedSession {
    pub identity: String,
    pub key: SessionKey,
}

pub struct AuthService {
    guard: Arc<LoginGuard>,
    gate: Arc<AuthGate>,
    directory: Arc<dyn UserDirectory>,
    hasher: Arc<dyn PasswordHasher>,
    policy: Arc<dyn PasswordPolicy>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl AuthService {
    #[must_use]
    pub fn new(
        guard: Arc<LoginGuard>,
        gate: Arc<AuthGate>,
        directory: Arc<dyn UserDirectory>,
        hasher: Arc<dyn PasswordHasher>,
        clock: Arc<dyn Clock>,
        config: &AuthConfig,
    ) -> Self {
        Self {
            guard,
            gate,
            directory,
            hasher,
            policy: Arc::new(LengthPolicy::default()),
            clock,
            timeout: config.store_timeout(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn PasswordPolicy>) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn gate(&self) -> &Arc<AuthGate> {
        &self.gate
    }

    #[must_use]
    pub fn guard(&self) -> &Arc<LoginGuard> {
        &self.guard
    }

    fn store(&self) -> &Arc<dyn SessionStore> {
        self.gate.store()
    }

    /// # Errors
    /// See [`RegisterError`].
    #[instrument(skip(self, password))]
    pub async fn register(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<(), RegisterError> {
        if !valid_username(username) {
            return Err(RegisterError::InvalidUsername);
        }
        self.policy
            .check(password.expose_secret())
            .map_err(RegisterError::WeakPassword)?;

        let hash = self.hash(password).await?;
        let created = with_timeout(
            self.timeout,
            self.directory.create_user(username, &hash, self.clock.now()),
        )
        .await?;
        if !created {
            return Err(RegisterError::Conflict);
        }
        info!("user registered");
        Ok(())
    }

    /// # Errors
    /// See [`LoginError`]. A storage failure never yields a session.
    #[instrument(skip(self, password))]
    pub async fn login(
        &self,
        identity: &str,
        origin: &str,
        password: &SecretString,
    ) -> Result<IssuedSession, LoginError> {
        let permit = match with_timeout(self.timeout, self.guard.admit(identity, origin)).await? {
            Admission::Locked(state) => {
                warn!(remaining_ms = state.remaining_ms(), "login rejected: locked out");
                return Err(LoginError::LockedOut {
                    remaining: state.remaining(),
                });
            }
            Admission::Open(permit) => permit,
        };

        let stored = with_timeout(self.timeout, self.directory.password_hash(identity)).await?;
        let verified = self.verify(password, stored).await?;
        with_timeout(self.timeout, permit.record(verified)).await?;

        if !verified {
            info!("login failed: invalid credentials");
            return Err(LoginError::InvalidCredentials);
        }

        let key = with_timeout(self.timeout, self.store().create(Some(identity))).await?;
        if let Err(err) = with_timeout(
            self.timeout,
            self.directory.record_login(identity, self.clock.now()),
        )
        .await
        {
            warn!("Failed to record last login: {err}");
        }

        info!(session = %key.fingerprint(), "login succeeded");
        Ok(IssuedSession {
            identity: identity.to_string(),
            key,
        })
    }

    /// Destroy the session. Unknown keys are ignored.
    ///
    /// # Errors
    /// Returns `StorageError` if the store could not be reached.
    #[instrument(skip_all, fields(session = %key.fingerprint()))]
    pub async fn logout(&self, key: &SessionKey) -> Result<(), StorageError> {
        with_timeout(self.timeout, self.store().destroy(key)).await
    }

    /// Account details for an authenticated identity, `None` if the user is gone.
    ///
    /// # Errors
    /// Returns `StorageError` if the directory could not be read.
    pub async fn profile(&self, identity: &str) -> Result<Option<UserProfile>, StorageError> {
        with_timeout(self.timeout, self.directory.profile(identity)).await
    }

    /// Change the password of the session's owner.
    ///
    /// Verifying the current password counts as a login attempt for the
    /// owner's lockout key. Every session owned by the identity is destroyed,
    /// including the one presented; the caller continues on the returned
    /// fresh session.
    ///
    /// # Errors
    /// See [`PasswordChangeError`].
    #[instrument(skip_all, fields(session = %key.fingerprint()))]
    pub async fn change_password(
        &self,
        key: &SessionKey,
        origin: &str,
        current: &SecretString,
        new: &SecretString,
    ) -> Result<IssuedSession, PasswordChangeError> {
        let Authentication::Authenticated(principal) = self.gate.authenticate(key).await else {
            return Err(PasswordChangeError::Unauthenticated);
        };
        let identity = principal.identity;

        let permit = match with_timeout(self.timeout, self.guard.admit(&identity, origin)).await? {
            Admission::Locked(state) => {
                warn!(remaining_ms = state.remaining_ms(), "password change rejected: locked out");
                return Err(PasswordChangeError::LockedOut {
                    remaining: state.remaining(),
                });
            }
            Admission::Open(permit) => permit,
        };
        let stored =
            with_timeout(self.timeout, self.directory.password_hash(&identity)).await?;
        let verified = self.verify(current, stored).await?;
        with_timeout(self.timeout, permit.record(verified)).await?;
        if !verified {
            info!("password change failed: current password incorrect");
            return Err(PasswordChangeError::InvalidCredentials);
        }
        self.policy
            .check(new.expose_secret())
            .map_err(PasswordChangeError::WeakPassword)?;

        let hash = self.hash(new).await?;
        if !with_timeout(
            self.timeout,
            self.directory.set_password_hash(&identity, &hash),
        )
        .await?
        {
            return Err(PasswordChangeError::Unauthenticated);
        }

        let revoked = with_timeout(self.timeout, self.store().destroy_all_for(&identity)).await?;
        let key = with_timeout(self.timeout, self.store().create(Some(&identity))).await?;
        info!(revoked, "password changed, sessions revoked");
        Ok(IssuedSession { identity, key })
    }

    /// Session with no identity, used to carry transient state such as a flash.
    ///
    /// # Errors
    /// Returns `StorageError` if the session could not be created.
    pub async fn start_anonymous(&self) -> Result<SessionKey, StorageError> {
        with_timeout(self.timeout, self.store().create(None)).await
    }

    async fn hash(&self, password: &SecretString) -> Result<String, CredentialError> {
        let hasher = self.hasher.clone();
        let plaintext = SecretString::from(password.expose_secret().to_owned());
        tokio::task::spawn_blocking(move || hasher.hash(plaintext.expose_secret()))
            .await
            .map_err(|err| CredentialError::Hashing(err.to_string()))?
    }

    /// `stored = None` still pays for a full verification against the decoy.
    async fn verify(
        &self,
        password: &SecretString,
        stored: Option<String>,
    ) -> Result<bool, CredentialError> {
        let hasher = self.hasher.clone();
        let plaintext = SecretString::from(password.expose_secret().to_owned());
        tokio::task::spawn_blocking(move || match stored {
            Some(hash) => hasher.verify(plaintext.expose_secret(), &hash),
            None => {
                let _ = hasher.verify(plaintext.expose_secret(), hasher.decoy_hash());
                false
            }
        })
        .await
        .map_err(|err| CredentialError::Hashing(err.to_string()))
    }
}

static USERNAME: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

fn valid_username(username: &str) -> bool {
    USERNAME
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]{3,32}$"))
        .as_ref()
        .is_ok_and(|re| re.is_match(username))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::attempts::MemoryAttemptLog;
    use crate::auth::clock::ManualClock;
    use crate::auth::credentials::{Argon2Hasher, MemoryUserDirectory};
    use crate::auth::session::MemorySessionStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wraps Argon2 and counts verifications.
    struct CountingHasher {
        inner: Argon2Hasher,
        verifications: AtomicUsize,
    }

    impl PasswordHasher for CountingHasher {
        fn hash(&self, plaintext: &str) -> Result<String, CredentialError> {
            self.inner.hash(plaintext)
        }

        fn verify(&self, plaintext: &str, hash: &str) -> bool {
            self.verifications.fetch_add(1, Ordering::SeqCst);
            self.inner.verify(plaintext, hash)
        }

        fn decoy_hash(&self) -> &str {
            self.inner.decoy_hash()
        }
    }

    struct Fixture {
        service: AuthService,
        clock: Arc<ManualClock>,
        hasher: Arc<CountingHasher>,
        directory: Arc<MemoryUserDirectory>,
        log: Arc<MemoryAttemptLog>,
    }

    fn fixture() -> Result<Fixture, CredentialError> {
        let config = AuthConfig::new()
            .with_lockout_threshold(5)
            .with_lockout_window(Duration::from_secs(10 * 60))
            .with_lockout_duration(Duration::from_secs(15 * 60))
            .with_session_ttl(Duration::from_secs(60 * 60));
        let clock = Arc::new(ManualClock::epoch());
        let log = Arc::new(MemoryAttemptLog::new());
        let store = Arc::new(MemorySessionStore::new(clock.clone(), config.session_ttl()));
        let directory = Arc::new(MemoryUserDirectory::new());
        let hasher = Arc::new(CountingHasher {
            inner: Argon2Hasher::with_cost(8, 1)?,
            verifications: AtomicUsize::new(0),
        });

        let guard = Arc::new(LoginGuard::new(log.clone(), clock.clone(), &config));
        let gate = Arc::new(AuthGate::new(store, config.store_timeout()));
        let service = AuthService::new(
            guard,
            gate,
            directory.clone(),
            hasher.clone(),
            clock.clone(),
            &config,
        );
        Ok(Fixture {
            service,
            clock,
            hasher,
            directory,
            log,
        })
    }

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    #[tokio::test]
    async fn register_validates_and_rejects_duplicates() -> Result<(), Box<dyn std::error::Error>> {
        let fx = fixture()?;
        fx.service.register("alice", &secret("correct horse")).await?;

        assert!(matches!(
            fx.service.register("alice", &secret("another pass")).await,
            Err(RegisterError::Conflict)
        ));
        assert!(matches!(
            fx.service.register("a!", &secret("correct horse")).await,
            Err(RegisterError::InvalidUsername)
        ));
        assert!(matches!(
            fx.service.register("carol", &secret("short")).await,
            Err(RegisterError::WeakPassword(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn login_issues_session_and_records_last_login() -> Result<(), Box<dyn std::error::Error>>
    {
        let fx = fixture()?;
        fx.service.register("bob", &secret("hunter2hunter2")).await?;

        let issued = fx
            .service
            .login("bob", "10.0.0.1", &secret("hunter2hunter2"))
            .await?;
        assert_eq!(issued.identity, "bob");
        let principal = fx.service.gate().authenticate(&issued.key).await.into_principal();
        assert_eq!(principal.map(|p| p.identity), Some("bob".to_string()));
        assert_eq!(fx.directory.last_login("bob").await, Some(fx.clock.now()));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_user_and_wrong_password_look_the_same() -> Result<(), Box<dyn std::error::Error>>
    {
        let fx = fixture()?;
        fx.service.register("bob", &secret("hunter2hunter2")).await?;

        let unknown = fx.service.login("mallory", "o", &secret("whatever1")).await;
        let wrong = fx.service.login("bob", "o", &secret("whatever1")).await;
        assert!(matches!(unknown, Err(LoginError::InvalidCredentials)));
        assert!(matches!(wrong, Err(LoginError::InvalidCredentials)));
        // Both paths performed a verification.
        assert_eq!(fx.hasher.verifications.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn alice_is_locked_out_then_recovers() -> Result<(), Box<dyn std::error::Error>> {
        let fx = fixture()?;
        fx.service.register("alice", &secret("open sesame")).await?;

        for _ in 0..5 {
            let result = fx.service.login("alice", "1.2.3.4", &secret("wrong pass")).await;
            assert!(matches!(result, Err(LoginError::InvalidCredentials)));
            fx.clock.advance(Duration::from_secs(30));
        }
        let verified_before = fx.hasher.verifications.load(Ordering::SeqCst);

        // Correct password, but the key is locked: the hasher is never reached.
        let remaining = match fx.service.login("alice", "1.2.3.4", &secret("open sesame")).await {
            Err(LoginError::LockedOut { remaining }) => remaining,
            other => panic!("expected lockout, got {other:?}"),
        };
        assert!(remaining > Duration::ZERO);
        assert!(remaining <= Duration::from_secs(15 * 60));
        assert_eq!(fx.hasher.verifications.load(Ordering::SeqCst), verified_before);

        fx.clock.advance(remaining);
        let issued = fx
            .service
            .login("alice", "1.2.3.4", &secret("open sesame"))
            .await?;
        assert_eq!(issued.identity, "alice");
        Ok(())
    }

    #[tokio::test]
    async fn logout_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
        let fx = fixture()?;
        fx.service.register("bob", &secret("hunter2hunter2")).await?;
        let issued = fx.service.login("bob", "o", &secret("hunter2hunter2")).await?;

        fx.service.logout(&issued.key).await?;
        fx.service.logout(&issued.key).await?;
        assert_eq!(
            fx.service.gate().authenticate(&issued.key).await,
            Authentication::Unauthenticated
        );
        Ok(())
    }

    #[tokio::test]
    async fn change_password_revokes_every_session() -> Result<(), Box<dyn std::error::Error>> {
        let fx = fixture()?;
        fx.service.register("bob", &secret("hunter2hunter2")).await?;
        let first = fx.service.login("bob", "a", &secret("hunter2hunter2")).await?;
        let second = fx.service.login("bob", "b", &secret("hunter2hunter2")).await?;

        let fresh = fx
            .service
            .change_password(&first.key, "a", &secret("hunter2hunter2"), &secret("new password"))
            .await?;

        let gate = fx.service.gate();
        assert_eq!(gate.authenticate(&first.key).await, Authentication::Unauthenticated);
        assert_eq!(gate.authenticate(&second.key).await, Authentication::Unauthenticated);
        assert!(gate.authenticate(&fresh.key).await.principal().is_some());

        assert!(matches!(
            fx.service.login("bob", "a", &secret("hunter2hunter2")).await,
            Err(LoginError::InvalidCredentials)
        ));
        fx.service.login("bob", "a", &secret("new password")).await?;
        Ok(())
    }

    #[tokio::test]
    async fn change_password_requires_current_password() -> Result<(), Box<dyn std::error::Error>> {
        let fx = fixture()?;
        fx.service.register("bob", &secret("hunter2hunter2")).await?;
        let issued = fx.service.login("bob", "a", &secret("hunter2hunter2")).await?;

        assert!(matches!(
            fx.service
                .change_password(&issued.key, "a", &secret("not it at all"), &secret("new password"))
                .await,
            Err(PasswordChangeError::InvalidCredentials)
        ));
        assert!(matches!(
            fx.service
                .change_password(
                    &SessionKey::from_client("forged"),
                    "a",
                    &secret("hunter2hunter2"),
                    &secret("new password")
                )
                .await,
            Err(PasswordChangeError::Unauthenticated)
        ));
        assert!(fx.service.gate().authenticate(&issued.key).await.principal().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn wrong_current_password_counts_toward_lockout() -> Result<(), Box<dyn std::error::Error>>
    {
        let fx = fixture()?;
        fx.service.register("bob", &secret("hunter2hunter2")).await?;
        let issued = fx.service.login("bob", "a", &secret("hunter2hunter2")).await?;

        for _ in 0..5 {
            assert!(matches!(
                fx.service
                    .change_password(&issued.key, "a", &secret("guess guess"), &secret("new password"))
                    .await,
                Err(PasswordChangeError::InvalidCredentials)
            ));
        }
        let verified_before = fx.hasher.verifications.load(Ordering::SeqCst);

        // The right password no longer helps, on either path.
        assert!(matches!(
            fx.service
                .change_password(&issued.key, "a", &secret("hunter2hunter2"), &secret("new password"))
                .await,
            Err(PasswordChangeError::LockedOut { .. })
        ));
        assert!(matches!(
            fx.service.login("bob", "b", &secret("hunter2hunter2")).await,
            Err(LoginError::LockedOut { .. })
        ));
        assert_eq!(fx.hasher.verifications.load(Ordering::SeqCst), verified_before);
        // One success from the login plus five failures.
        assert_eq!(fx.log.len().await, 6);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_guesses_stop_at_the_threshold() -> Result<(), Box<dyn std::error::Error>> {
        let fx = fixture()?;
        fx.service.register("alice", &secret("open sesame")).await?;
        let service = Arc::new(fx.service);

        let mut handles = Vec::new();
        for _ in 0..20 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.login("alice", "1.2.3.4", &secret("wrong pass")).await
            }));
        }
        let (mut rejected, mut locked) = (0, 0);
        for handle in handles {
            match handle.await? {
                Err(LoginError::InvalidCredentials) => rejected += 1,
                Err(LoginError::LockedOut { .. }) => locked += 1,
                other => panic!("unexpected outcome {other:?}"),
            }
        }

        assert_eq!(rejected, 5);
        assert_eq!(locked, 15);
        assert_eq!(fx.hasher.verifications.load(Ordering::SeqCst), 5);
        assert_eq!(fx.log.len().await, 5);
        Ok(())
    }

    #[tokio::test]
    async fn profile_reports_creation_and_last_login() -> Result<(), Box<dyn std::error::Error>> {
        let fx = fixture()?;
        let created = fx.clock.now();
        fx.service.register("bob", &secret("hunter2hunter2")).await?;

        let fresh = fx.service.profile("bob").await?.ok_or("missing profile")?;
        assert_eq!(fresh.created_at, created);
        assert_eq!(fresh.last_login, None);

        fx.clock.advance(Duration::from_secs(90));
        fx.service.login("bob", "a", &secret("hunter2hunter2")).await?;
        let after = fx.service.profile("bob").await?.ok_or("missing profile")?;
        assert_eq!(after.username, "bob");
        assert_eq!(after.last_login, Some(fx.clock.now()));
        assert!(fx.service.profile("nobody").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn anonymous_session_carries_no_identity() -> Result<(), Box<dyn std::error::Error>> {
        let fx = fixture()?;
        let key = fx.service.start_anonymous().await?;
        assert_eq!(
            fx.service.gate().authenticate(&key).await,
            Authentication::Unauthenticated
        );
        Ok(())
    }

    #[test]
    fn username_rules() {
        assert!(valid_username("bob"));
        assert!(valid_username("first.last-2_x"));
        assert!(!valid_username("ab"));
        assert!(!valid_username("with space"));
        assert!(!valid_username(&"x".repeat(33)));
    }

    #[test]
    fn username_pattern_is_compiled_once() {
        assert!(valid_username("bob"));
        let first = USERNAME.get().map(std::ptr::from_ref);
        assert!(first.is_some());
        assert!(!valid_username("no"));
        assert_eq!(USERNAME.get().map(std::ptr::from_ref), first);
        assert!(matches!(USERNAME.get(), Some(Ok(_))));
    }
}
