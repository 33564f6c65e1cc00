//! Session, lockout, and verification tuning arguments.

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};

#[derive(Debug)]
pub struct Options {
    pub signing_secret: String,
    pub cookie_domain: Option<String>,
    pub cookie_secure: bool,
    pub cors_origin: Option<String>,
    pub lockout_threshold: Option<u32>,
    pub lockout_window_seconds: Option<i64>,
    pub access_ttl_seconds: Option<i64>,
    pub refresh_ttl_seconds: Option<i64>,
    pub code_ttl_seconds: Option<i64>,
    pub idle_timeout_seconds: Option<i64>,
    pub sweep_interval_seconds: Option<u64>,
}

impl Options {
    /// Extract the auth options from parsed matches.
    ///
    /// # Errors
    /// Returns an error if the signing secret is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let signing_secret = matches
            .get_one::<String>("signing-secret")
            .cloned()
            .context("missing required argument: --signing-secret")?;

        Ok(Self {
            signing_secret,
            cookie_domain: matches.get_one::<String>("cookie-domain").cloned(),
            cookie_secure: matches.get_flag("cookie-secure"),
            cors_origin: matches.get_one::<String>("cors-origin").cloned(),
            lockout_threshold: matches.get_one::<u32>("lockout-threshold").copied(),
            lockout_window_seconds: matches
                .get_one::<i64>("lockout-window-seconds")
                .copied(),
            access_ttl_seconds: matches.get_one::<i64>("access-ttl-seconds").copied(),
            refresh_ttl_seconds: matches.get_one::<i64>("refresh-ttl-seconds").copied(),
            code_ttl_seconds: matches.get_one::<i64>("code-ttl-seconds").copied(),
            idle_timeout_seconds: matches.get_one::<i64>("idle-timeout-seconds").copied(),
            sweep_interval_seconds: matches
                .get_one::<u64>("sweep-interval-seconds")
                .copied(),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("signing-secret")
                .long("signing-secret")
                .help("Secret used to sign access tokens (at least 32 bytes)")
                .env("CUSTODIA_SIGNING_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("cookie-domain")
                .long("cookie-domain")
                .help("Domain attribute for session cookies")
                .env("CUSTODIA_COOKIE_DOMAIN"),
        )
        .arg(
            Arg::new("cookie-secure")
                .long("cookie-secure")
                .help("Mark session cookies Secure (HTTPS only)")
                .env("CUSTODIA_COOKIE_SECURE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("cors-origin")
                .long("cors-origin")
                .help("Exact origin allowed to make credentialed browser requests")
                .env("CUSTODIA_CORS_ORIGIN"),
        )
        .arg(
            Arg::new("lockout-threshold")
                .long("lockout-threshold")
                .help("Consecutive sign-in failures before the account locks")
                .env("CUSTODIA_LOCKOUT_THRESHOLD")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("lockout-window-seconds")
                .long("lockout-window-seconds")
                .help("How long a locked account stays locked")
                .env("CUSTODIA_LOCKOUT_WINDOW_SECONDS")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("access-ttl-seconds")
                .long("access-ttl-seconds")
                .help("Access token lifetime")
                .env("CUSTODIA_ACCESS_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("refresh-ttl-seconds")
                .long("refresh-ttl-seconds")
                .help("Session / refresh token lifetime")
                .env("CUSTODIA_REFRESH_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("code-ttl-seconds")
                .long("code-ttl-seconds")
                .help("Email verification code lifetime")
                .env("CUSTODIA_CODE_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("idle-timeout-seconds")
                .long("idle-timeout-seconds")
                .help("Sessions idle longer than this are swept")
                .env("CUSTODIA_IDLE_TIMEOUT_SECONDS")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("sweep-interval-seconds")
                .long("sweep-interval-seconds")
                .help("How often the background sweeper runs")
                .env("CUSTODIA_SWEEP_INTERVAL_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
}
