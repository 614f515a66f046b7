//! Lockout and session configuration.
//!
//! Built once at startup from CLI/env values and shared read-only afterwards.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_LOCKOUT_THRESHOLD: u32 = 5;
const DEFAULT_LOCKOUT_WINDOW: Duration = Duration::from_secs(15 * 60);
const DEFAULT_LOCKOUT_DURATION: Duration = Duration::from_secs(15 * 60);
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Which attempts count against a login.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LockoutScope {
    /// Every attempt for the username, regardless of where it came from.
    #[default]
    Identity,
    /// Only attempts for the username from the same client address.
    IdentityAndOrigin,
}

impl LockoutScope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::IdentityAndOrigin => "identity-origin",
        }
    }
}

impl fmt::Display for LockoutScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockoutScope {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "identity" => Ok(Self::Identity),
            "identity-origin" | "identity_origin" => Ok(Self::IdentityAndOrigin),
            other => Err(ConfigError::UnknownScope(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("lockout threshold must be at least 1")]
    ZeroThreshold,
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("unknown lockout scope: {0}")]
    UnknownScope(String),
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    lockout_threshold: u32,
    lockout_window: Duration,
    lockout_duration: Duration,
    lockout_scope: LockoutScope,
    session_ttl: Duration,
    session_cookie_secure: bool,
    store_timeout: Duration,
    sweep_interval: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            lockout_threshold: DEFAULT_LOCKOUT_THRESHOLD,
            lockout_window: DEFAULT_LOCKOUT_WINDOW,
            lockout_duration: DEFAULT_LOCKOUT_DURATION,
            lockout_scope: LockoutScope::default(),
            session_ttl: DEFAULT_SESSION_TTL,
            session_cookie_secure: false,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_lockout_threshold(mut self, threshold: u32) -> Self {
        self.lockout_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_lockout_window(mut self, window: Duration) -> Self {
        self.lockout_window = window;
        self
    }

    #[must_use]
    pub fn with_lockout_duration(mut self, duration: Duration) -> Self {
        self.lockout_duration = duration;
        self
    }

    #[must_use]
    pub fn with_lockout_scope(mut self, scope: LockoutScope) -> Self {
        self.lockout_scope = scope;
        self
    }

    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_session_cookie_secure(mut self, secure: bool) -> Self {
        self.session_cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    #[must_use]
    pub fn lockout_threshold(&self) -> u32 {
        self.lockout_threshold
    }

    #[must_use]
    pub fn lockout_window(&self) -> Duration {
        self.lockout_window
    }

    #[must_use]
    pub fn lockout_duration(&self) -> Duration {
        self.lockout_duration
    }

    #[must_use]
    pub fn lockout_scope(&self) -> LockoutScope {
        self.lockout_scope
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        self.session_cookie_secure
    }

    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// How far back attempt history must reach to evaluate any lockout that
    /// could still be active.
    #[must_use]
    pub fn attempt_retention(&self) -> Duration {
        self.lockout_window.saturating_add(self.lockout_duration)
    }

    /// Reject values that would make lockout or sessions meaningless.
    ///
    /// # Errors
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lockout_threshold == 0 {
            return Err(ConfigError::ZeroThreshold);
        }
        if self.lockout_window.is_zero() {
            return Err(ConfigError::ZeroDuration("lockout window"));
        }
        if self.lockout_duration.is_zero() {
            return Err(ConfigError::ZeroDuration("lockout duration"));
        }
        if self.session_ttl.is_zero() {
            return Err(ConfigError::ZeroDuration("session ttl"));
        }
        if self.store_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("store timeout"));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("sweep interval"));
        }
        Ok(())
    }
}
