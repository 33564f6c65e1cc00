//! Background sweeper that deactivates expired and idle sessions.
//!
//! One sweeper task runs per process on a fixed interval. The sweep itself is
//! a single bounded storage call, so tests drive [`SessionSweeper::run_once`]
//! directly and the spawned loop is just a timer around it.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info};

use super::handlers::auth::state::AuthConfig;
use super::handlers::auth::store::AuthStore;

pub struct SessionSweeper {
    store: Arc<dyn AuthStore>,
    grace_seconds: i64,
    idle_timeout_seconds: i64,
    batch_limit: i64,
    interval: Duration,
}

/// Handle for the spawned sweeper loop; dropping it does not stop the task,
/// [`SweeperHandle::stop`] does.
pub struct SweeperHandle {
    stop: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the loop to exit and wait for it.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

impl SessionSweeper {
    #[must_use]
    pub fn new(store: Arc<dyn AuthStore>, config: &AuthConfig) -> Self {
        Self {
            store,
            grace_seconds: config.sweep_grace_seconds(),
            idle_timeout_seconds: config.idle_timeout_seconds(),
            batch_limit: config.sweep_batch_limit(),
            interval: Duration::from_secs(config.sweep_interval_seconds()),
        }
    }

    /// One bounded pass; returns the number of sessions deactivated.
    pub async fn run_once(&self) -> anyhow::Result<u64> {
        let swept = self
            .store
            .sweep_sessions(
                Utc::now(),
                self.grace_seconds,
                self.idle_timeout_seconds,
                self.batch_limit,
            )
            .await?;
        if swept > 0 {
            info!(swept, "deactivated stale sessions");
        } else {
            debug!("sweep pass found nothing to do");
        }
        Ok(swept)
    }

    /// Spawn the interval loop. A failed pass is logged and retried on the
    /// next tick; storage hiccups never kill the task.
    pub fn spawn(self) -> SweeperHandle {
        let (stop, mut stopped) = watch::channel(false);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = sleep(self.interval) => {
                        if let Err(err) = self.run_once().await {
                            error!("session sweep failed: {err:#}");
                        }
                    }
                    _ = stopped.changed() => {
                        if *stopped.borrow() {
                            info!("session sweeper stopping");
                            return;
                        }
                    }
                }
            }
        });
        SweeperHandle { stop, task }
    }
}
