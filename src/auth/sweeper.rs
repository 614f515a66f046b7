//! Background reclamation of expired sessions and stale login attempts.
//!
//! Expiry is already enforced on every read; this worker only keeps storage
//! from growing without bound.

use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use super::guard::LoginGuard;
use super::session::SessionStore;

/// Rows removed by one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: u64,
    pub attempts: u64,
}

/// Run a single sweep. Each half is attempted even if the other fails.
pub async fn sweep_once(store: &dyn SessionStore, guard: &LoginGuard) -> SweepReport {
    let mut report = SweepReport::default();
    match store.evict_expired().await {
        Ok(count) => report.sessions = count,
        Err(err) => error!("Failed to evict expired sessions: {err}"),
    }
    match guard.prune().await {
        Ok(count) => report.attempts = count,
        Err(err) => error!("Failed to prune login attempts: {err}"),
    }
    report
}

/// Handle to the running worker. Dropping it also stops the worker.
pub struct Sweeper {
    shutdown_tx: watch::Sender<()>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    #[must_use]
    pub fn spawn(
        store: Arc<dyn SessionStore>,
        guard: Arc<LoginGuard>,
        every: Duration,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(());

        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                select! {
                    _ = ticker.tick() => {
                        let report = sweep_once(store.as_ref(), &guard).await;
                        if report != SweepReport::default() {
                            info!(sessions = report.sessions, attempts = report.attempts, "sweep removed expired state");
                        } else {
                            debug!("sweep found nothing to remove");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("sweeper stopping");
                        break;
                    }
                }
            }
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Signal the worker and wait for it to finish its current sweep.
    pub async fn shutdown(self) {
        let Self {
            shutdown_tx,
            handle,
        } = self;
        let _ = shutdown_tx.send(());
        drop(shutdown_tx);
        if let Err(err) = handle.await {
            error!("sweeper task failed: {err}");
        }
    }
}
