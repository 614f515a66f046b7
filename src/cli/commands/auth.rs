use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::time::Duration;

use crate::auth::LockoutScope;

pub const ARG_LOCKOUT_THRESHOLD: &str = "lockout-threshold";
pub const ARG_LOCKOUT_WINDOW_MS: &str = "lockout-window-ms";
pub const ARG_LOCKOUT_DURATION_MS: &str = "lockout-duration-ms";
pub const ARG_LOCKOUT_SCOPE: &str = "lockout-scope";
pub const ARG_SESSION_TTL_MS: &str = "session-ttl-ms";
pub const ARG_SESSION_COOKIE_SECURE: &str = "session-cookie-secure";

#[derive(Debug)]
pub struct Options {
    pub lockout_threshold: u32,
    pub lockout_window: Duration,
    pub lockout_duration: Duration,
    pub lockout_scope: LockoutScope,
    pub session_ttl: Duration,
    pub session_cookie_secure: bool,
}

impl Options {
    /// # Errors
    /// Returns an error if the lockout scope is not recognized.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let millis = |id: &str, default: u64| {
            Duration::from_millis(matches.get_one::<u64>(id).copied().unwrap_or(default))
        };
        let lockout_scope = matches
            .get_one::<String>(ARG_LOCKOUT_SCOPE)
            .map_or(Ok(LockoutScope::default()), |scope| scope.parse::<LockoutScope>())
            .map_err(|err| anyhow!("invalid --{ARG_LOCKOUT_SCOPE}: {err}"))?;

        Ok(Self {
            lockout_threshold: matches
                .get_one::<u32>(ARG_LOCKOUT_THRESHOLD)
                .copied()
                .unwrap_or(5),
            lockout_window: millis(ARG_LOCKOUT_WINDOW_MS, 900_000),
            lockout_duration: millis(ARG_LOCKOUT_DURATION_MS, 900_000),
            lockout_scope,
            session_ttl: millis(ARG_SESSION_TTL_MS, 86_400_000),
            session_cookie_secure: matches.get_flag(ARG_SESSION_COOKIE_SECURE),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_lockout_args(command);
    with_session_args(command)
}

fn with_lockout_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LOCKOUT_THRESHOLD)
                .long(ARG_LOCKOUT_THRESHOLD)
                .help("Failed logins within the window that trigger a lockout")
                .env("GATEHOUSE_LOCKOUT_THRESHOLD")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_LOCKOUT_WINDOW_MS)
                .long(ARG_LOCKOUT_WINDOW_MS)
                .help("Window in which failures are counted, in milliseconds")
                .env("GATEHOUSE_LOCKOUT_WINDOW_MS")
                .default_value("900000")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_LOCKOUT_DURATION_MS)
                .long(ARG_LOCKOUT_DURATION_MS)
                .help("How long a lockout lasts, in milliseconds")
                .env("GATEHOUSE_LOCKOUT_DURATION_MS")
                .default_value("900000")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_LOCKOUT_SCOPE)
                .long(ARG_LOCKOUT_SCOPE)
                .help("Lockout key: identity, or identity-origin")
                .env("GATEHOUSE_LOCKOUT_SCOPE")
                .default_value("identity")
                .value_parser(["identity", "identity-origin"]),
        )
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_TTL_MS)
                .long(ARG_SESSION_TTL_MS)
                .help("Sliding session lifetime, in milliseconds")
                .env("GATEHOUSE_SESSION_TTL_MS")
                .default_value("86400000")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_SESSION_COOKIE_SECURE)
                .long(ARG_SESSION_COOKIE_SECURE)
                .help("Mark the session cookie Secure (serve over HTTPS)")
                .env("GATEHOUSE_SESSION_COOKIE_SECURE")
                .action(ArgAction::SetTrue),
        )
}
