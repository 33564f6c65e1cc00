use crate::{
    api,
    cli::{actions::Action, commands::auth},
};
use anyhow::Result;
use secrecy::SecretString;
use tracing::info;

use crate::api::handlers::auth::AuthConfig;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub auth: auth::Options,
}

/// Handle the server action.
///
/// # Errors
/// Returns an error if the configuration is invalid or the server fails to start.
pub async fn handle(action: Action) -> Result<()> {
    let Action::Server(args) = action;

    info!(port = args.port, "Starting {}", crate::APP_USER_AGENT);

    let config = build_config(&args.auth)?;

    api::new(args.port, args.dsn, config, args.auth.cors_origin.clone()).await
}

fn build_config(opts: &auth::Options) -> Result<AuthConfig> {
    let mut config = AuthConfig::new(SecretString::from(opts.signing_secret.clone()))?
        .with_cookie_domain(opts.cookie_domain.clone())
        .with_cookie_secure(opts.cookie_secure);

    if let Some(threshold) = opts.lockout_threshold {
        config = config.with_lockout_threshold(threshold);
    }
    if let Some(seconds) = opts.lockout_window_seconds {
        config = config.with_lockout_window_seconds(seconds);
    }
    if let Some(seconds) = opts.access_ttl_seconds {
        config = config.with_access_ttl_seconds(seconds);
    }
    if let Some(seconds) = opts.refresh_ttl_seconds {
        config = config.with_refresh_ttl_seconds(seconds);
    }
    if let Some(seconds) = opts.code_ttl_seconds {
        config = config.with_code_ttl_seconds(seconds);
    }
    if let Some(seconds) = opts.idle_timeout_seconds {
        config = config.with_idle_timeout_seconds(seconds);
    }
    if let Some(seconds) = opts.sweep_interval_seconds {
        config = config.with_sweep_interval_seconds(seconds);
    }

    Ok(config)
}
