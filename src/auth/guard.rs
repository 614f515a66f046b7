//! Brute-force login protection.
//!
//! Policy:
//! - Only failures after the most recent success for the key count.
//! - A failure *triggers* a lockout when at least `threshold` counted failures
//!   (itself included) fall inside `[failure - window, failure]`.
//! - A lockout lasts `duration` from its triggering failure, independent of the
//!   window. The key is locked while any trigger is younger than `duration`.
//!
//! The decision is recomputed from the attempt log on every check, so a new
//! failure or a window boundary is always reflected immediately.
//!
//! Callers that verify credentials go through [`LoginGuard::admit`]: the
//! returned permit holds a per-key lock from the lockout check until the
//! outcome is recorded, so concurrent attempts on one key cannot all pass the
//! check before any of them is logged.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as KeyLock, OwnedMutexGuard};
use tracing::{debug, instrument, warn};

use super::attempts::{AttemptLog, AttemptOutcome, LoginAttempt};
use super::clock::{self, Clock};
use super::config::{AuthConfig, LockoutScope};
use super::error::StorageError;

/// Lockout decision for one key at one instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockoutState {
    locked: bool,
    remaining: Duration,
}

impl LockoutState {
    #[must_use]
    pub const fn unlocked() -> Self {
        Self {
            locked: false,
            remaining: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn locked_for(remaining: Duration) -> Self {
        Self {
            locked: true,
            remaining,
        }
    }

    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    /// Time until the lockout ends; zero when unlocked.
    #[must_use]
    pub const fn remaining(&self) -> Duration {
        self.remaining
    }

    #[must_use]
    pub fn remaining_ms(&self) -> u64 {
        u64::try_from(self.remaining.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Outcome of [`LoginGuard::admit`].
pub enum Admission<'a> {
    Locked(LockoutState),
    Open(AttemptPermit<'a>),
}

/// Exclusive right to make one credential attempt for a lockout key.
///
/// The key stays locked for other callers until the permit is recorded or dropped.
pub struct AttemptPermit<'a> {
    guard: &'a LoginGuard,
    identity: String,
    origin: String,
    _held: OwnedMutexGuard<()>,
}

impl AttemptPermit<'_> {
    /// Append the attempt outcome and release the key.
    ///
    /// # Errors
    /// Returns `StorageError` if the entry could not be written.
    pub async fn record(self, success: bool) -> Result<(), StorageError> {
        self.guard
            .record_attempt(&self.identity, &self.origin, success)
            .await
    }
}

type SerialKey = (String, Option<String>);

pub struct LoginGuard {
    log: Arc<dyn AttemptLog>,
    clock: Arc<dyn Clock>,
    threshold: usize,
    window: Duration,
    duration: Duration,
    scope: LockoutScope,
    in_flight: Mutex<HashMap<SerialKey, Arc<KeyLock<()>>>>,
}

impl LoginGuard {
    #[must_use]
    pub fn new(log: Arc<dyn AttemptLog>, clock: Arc<dyn Clock>, config: &AuthConfig) -> Self {
        Self {
            log,
            clock,
            threshold: usize::try_from(config.lockout_threshold()).unwrap_or(usize::MAX),
            window: config.lockout_window(),
            duration: config.lockout_duration(),
            scope: config.lockout_scope(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Serialize on the lockout key, then check it.
    ///
    /// An `Open` admission keeps the key exclusive until its permit is
    /// recorded or dropped; a `Locked` one releases it immediately.
    ///
    /// # Errors
    /// Returns `StorageError` if the attempt log cannot be read.
    pub async fn admit(&self, identity: &str, origin: &str) -> Result<Admission<'_>, StorageError> {
        let slot = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            // Slots are only cloned under this lock, so a count of one means idle.
            in_flight.retain(|_, slot| Arc::strong_count(slot) > 1);
            in_flight
                .entry((
                    identity.to_string(),
                    self.scoped_origin(origin).map(str::to_string),
                ))
                .or_default()
                .clone()
        };
        let held = slot.lock_owned().await;

        let state = self.check_lockout(identity, origin).await?;
        if state.is_locked() {
            return Ok(Admission::Locked(state));
        }
        Ok(Admission::Open(AttemptPermit {
            guard: self,
            identity: identity.to_string(),
            origin: origin.to_string(),
            _held: held,
        }))
    }

    /// Evaluate whether `identity` may attempt a login right now. Never writes.
    ///
    /// Unknown identities are evaluated like any other: with no failures on
    /// record they are simply unlocked.
    ///
    /// # Errors
    /// Returns `StorageError` if the attempt log cannot be read.
    #[instrument(skip(self))]
    pub async fn check_lockout(
        &self,
        identity: &str,
        origin: &str,
    ) -> Result<LockoutState, StorageError> {
        let now = self.clock.now();
        let since = clock::sub(now, self.window.saturating_add(self.duration));
        let attempts = self
            .log
            .since(identity, self.scoped_origin(origin), since)
            .await?;

        let state = self.evaluate(&attempts, now);
        if state.is_locked() {
            debug!(remaining_ms = state.remaining_ms(), "login locked");
        }
        Ok(state)
    }

    /// Append an attempt stamped with the current time.
    ///
    /// # Errors
    /// Returns `StorageError` if the entry could not be written.
    #[instrument(skip(self))]
    pub async fn record_attempt(
        &self,
        identity: &str,
        origin: &str,
        success: bool,
    ) -> Result<(), StorageError> {
        let attempt = LoginAttempt {
            identity: identity.to_string(),
            origin: origin.to_string(),
            occurred_at: self.clock.now(),
            outcome: AttemptOutcome::from_success(success),
        };
        self.log.append(attempt).await.map_err(|err| {
            warn!("Failed to record login attempt: {err}");
            err
        })
    }

    /// Drop attempts too old to influence any current or future decision.
    ///
    /// # Errors
    /// Returns `StorageError` if the log cannot be pruned.
    pub async fn prune(&self) -> Result<u64, StorageError> {
        let cutoff = clock::sub(self.clock.now(), self.window.saturating_add(self.duration));
        self.log.prune(cutoff).await
    }

    fn scoped_origin<'a>(&self, origin: &'a str) -> Option<&'a str> {
        match self.scope {
            LockoutScope::Identity => None,
            LockoutScope::IdentityAndOrigin => Some(origin),
        }
    }

    /// `attempts` must be sorted oldest first.
    fn evaluate(&self, attempts: &[LoginAttempt], now: DateTime<Utc>) -> LockoutState {
        let active_after = clock::sub(now, self.duration);
        let mut counted: VecDeque<DateTime<Utc>> = VecDeque::new();
        let mut locked_until: Option<DateTime<Utc>> = None;

        for attempt in attempts.iter().filter(|attempt| attempt.occurred_at <= now) {
            match attempt.outcome {
                AttemptOutcome::Success => {
                    counted.clear();
                    locked_until = None;
                }
                AttemptOutcome::Failure => {
                    let window_start = clock::sub(attempt.occurred_at, self.window);
                    while counted.front().is_some_and(|at| *at < window_start) {
                        counted.pop_front();
                    }
                    counted.push_back(attempt.occurred_at);

                    if counted.len() >= self.threshold && attempt.occurred_at > active_after {
                        locked_until = Some(clock::add(attempt.occurred_at, self.duration));
                    }
                }
            }
        }

        match locked_until {
            Some(until) if now < until => LockoutState::locked_for(clock::remaining(now, until)),
            _ => LockoutState::unlocked(),
        }
    }
}
