use crate::api::{self, AppState};
use crate::auth::{
    credentials::{Argon2Hasher, MemoryUserDirectory, PasswordHasher, UserDirectory},
    storage::{apply_schema, PgAttemptLog, PgSessionStore, PgUserDirectory},
    sweeper::Sweeper,
    AttemptLog, AuthConfig, AuthGate, AuthService, Clock, LoginGuard, MemoryAttemptLog,
    MemorySessionStore, SessionStore, SystemClock,
};
use crate::cli::telemetry;
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::signal;
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<SecretString>,
    pub config: AuthConfig,
}

struct Backends {
    sessions: Arc<dyn SessionStore>,
    attempts: Arc<dyn AttemptLog>,
    users: Arc<dyn UserDirectory>,
}

/// Wire the backends, start the sweeper and serve until a shutdown signal.
///
/// # Errors
/// Returns an error if the configuration is invalid, the database is
/// unreachable, or the listener cannot be bound.
pub async fn execute(args: Args) -> Result<()> {
    let Args { port, dsn, config } = args;
    config.validate()?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let backends = match dsn {
        Some(dsn) => postgres_backends(&dsn, Arc::clone(&clock), &config).await?,
        None => {
            warn!("No DSN configured, sessions and lockout state are kept in memory");
            memory_backends(Arc::clone(&clock), &config)
        }
    };

    let hasher: Arc<dyn PasswordHasher> =
        Arc::new(Argon2Hasher::new().context("Failed to initialize password hasher")?);
    let guard = Arc::new(LoginGuard::new(
        backends.attempts,
        Arc::clone(&clock),
        &config,
    ));
    let gate = Arc::new(AuthGate::new(
        Arc::clone(&backends.sessions),
        config.store_timeout(),
    ));
    let service = Arc::new(AuthService::new(
        Arc::clone(&guard),
        gate,
        backends.users,
        hasher,
        clock,
        &config,
    ));

    let sweeper = Sweeper::spawn(backends.sessions, guard, config.sweep_interval());

    info!(
        threshold = config.lockout_threshold(),
        window_ms = millis(config.lockout_window()),
        duration_ms = millis(config.lockout_duration()),
        scope = %config.lockout_scope(),
        session_ttl_ms = millis(config.session_ttl()),
        "Lockout policy loaded"
    );

    let state = Arc::new(AppState::new(service, config));
    let served = api::serve(port, state, shutdown_signal()).await;

    sweeper.shutdown().await;
    telemetry::shutdown_tracer();

    served
}

fn memory_backends(clock: Arc<dyn Clock>, config: &AuthConfig) -> Backends {
    Backends {
        sessions: Arc::new(MemorySessionStore::new(clock, config.session_ttl())),
        attempts: Arc::new(MemoryAttemptLog::new()),
        users: Arc::new(MemoryUserDirectory::new()),
    }
}

async fn postgres_backends(
    dsn: &SecretString,
    clock: Arc<dyn Clock>,
    config: &AuthConfig,
) -> Result<Backends> {
    info!("Connecting to {}", redact_dsn(dsn.expose_secret()));

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn.expose_secret())
        .await
        .context("Failed to connect to database")?;

    apply_schema(&pool)
        .await
        .context("Failed to apply database schema")?;

    Ok(Backends {
        sessions: Arc::new(PgSessionStore::new(
            pool.clone(),
            clock,
            config.session_ttl(),
        )),
        attempts: Arc::new(PgAttemptLog::new(pool.clone())),
        users: Arc::new(PgUserDirectory::new(pool)),
    })
}

/// DSN with the password masked, safe for logs.
fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut url) => {
            if url.password().is_some() && url.set_password(Some("*****")).is_err() {
                return "<dsn>".to_string();
            }
            url.to_string()
        }
        Err(_) => "<dsn>".to_string(),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(err) => {
                warn!("Failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
