use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

pub const ARG_DSN: &str = "dsn";
pub const ARG_STORE_TIMEOUT_MS: &str = "store-timeout-ms";
pub const ARG_SWEEP_INTERVAL_SECONDS: &str = "sweep-interval-seconds";

#[derive(Debug)]
pub struct Options {
    /// `None` selects the in-memory backends.
    pub dsn: Option<SecretString>,
    pub store_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Options {
    /// # Errors
    /// Returns an error if a required value is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            dsn: matches
                .get_one::<String>(ARG_DSN)
                .filter(|dsn| !dsn.trim().is_empty())
                .map(|dsn| SecretString::from(dsn.clone())),
            store_timeout: Duration::from_millis(
                matches
                    .get_one::<u64>(ARG_STORE_TIMEOUT_MS)
                    .copied()
                    .unwrap_or(2000),
            ),
            sweep_interval: Duration::from_secs(
                matches
                    .get_one::<u64>(ARG_SWEEP_INTERVAL_SECONDS)
                    .copied()
                    .unwrap_or(60),
            ),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("PostgreSQL connection string")
                .long_help(
                    "PostgreSQL connection string. When omitted, sessions, users and login attempts are kept in memory and lost on restart.",
                )
                .env("GATEHOUSE_DSN"),
        )
        .arg(
            Arg::new(ARG_STORE_TIMEOUT_MS)
                .long(ARG_STORE_TIMEOUT_MS)
                .help("Timeout for a single session/attempt store operation, in milliseconds")
                .env("GATEHOUSE_STORE_TIMEOUT_MS")
                .default_value("2000")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_SWEEP_INTERVAL_SECONDS)
                .long(ARG_SWEEP_INTERVAL_SECONDS)
                .help("How often expired sessions and stale attempts are removed")
                .env("GATEHOUSE_SWEEP_INTERVAL_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
}
