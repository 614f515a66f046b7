//! # Authentication core
//!
//! Brute-force login protection and the session lifecycle shared by every
//! boundary layer.
//!
//! - [`guard::LoginGuard`] decides from the [`attempts::AttemptLog`] whether a
//!   login may proceed, and records each outcome.
//! - [`session::SessionStore`] owns expiring, keyed session records. Only the
//!   SHA-256 digest of a key is ever persisted.
//! - [`gate::AuthGate`] turns a presented key into an identity and is the only
//!   path protected operations use to reach the store.
//! - [`service::AuthService`] wires the three together with the credential
//!   capabilities into register/login/logout/change-password.
//!
//! Time always comes from an injected [`clock::Clock`].

pub mod attempts;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod error;
pub mod gate;
pub mod guard;
pub mod service;
pub mod session;
pub mod storage;
pub mod sweeper;

pub use attempts::{AttemptLog, MemoryAttemptLog, UNKNOWN_ORIGIN};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AuthConfig, ConfigError, LockoutScope};
pub use error::{SessionError, StorageError};
pub use gate::{AuthGate, Authentication, Principal};
pub use guard::{Admission, AttemptPermit, LockoutState, LoginGuard};
pub use service::{AuthService, IssuedSession, LoginError, PasswordChangeError, RegisterError};
pub use session::{Flash, FlashLevel, MemorySessionStore, SessionKey, SessionStore};
