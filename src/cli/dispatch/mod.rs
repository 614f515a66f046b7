use crate::auth::AuthConfig;
use crate::cli::{
    actions::{server, Action},
    commands::{auth, storage, ARG_PORT},
};
use anyhow::Result;

/// Turn parsed arguments into the action to run.
///
/// # Errors
/// Returns an error if an argument cannot be converted or the resulting
/// configuration is inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let auth = auth::Options::parse(matches)?;
    let storage = storage::Options::parse(matches)?;

    let config = AuthConfig::new()
        .with_lockout_threshold(auth.lockout_threshold)
        .with_lockout_window(auth.lockout_window)
        .with_lockout_duration(auth.lockout_duration)
        .with_lockout_scope(auth.lockout_scope)
        .with_session_ttl(auth.session_ttl)
        .with_session_cookie_secure(auth.session_cookie_secure)
        .with_store_timeout(storage.store_timeout)
        .with_sweep_interval(storage.sweep_interval);
    config.validate()?;

    Ok(Action::Server(server::Args {
        port: matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080),
        dsn: storage.dsn,
        config,
    }))
}
