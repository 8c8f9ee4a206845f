//! Background sync driver.
//!
//! [`SyncDriver`] waits for connectivity, runs a pass over every tracked
//! wallet, then sleeps until the next interval or the next connectivity
//! transition, whichever comes first. A pass that fails as a whole (remote
//! unreachable, store error) backs off exponentially instead.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::connectivity::ConnectivityWatch;
use super::remote::RemoteLedger;
use crate::OffpayError;
use crate::ledger::OfflineLedger;
use crate::models::WalletId;

/// Initial backoff after a failed pass.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Maximum backoff between failed passes.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// How a pass over all wallets went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassOutcome {
    Clean,
    Failed,
}

/// Why the wait between passes ended.
enum Wake {
    Timer,
    ConnectivityChanged,
    Shutdown,
}

/// Runs reconciliation passes in the background.
pub struct SyncDriver<R> {
    ledger: Arc<OfflineLedger<R>>,
    /// Wallets to sync; empty means every registered wallet.
    wallets: Vec<WalletId>,
    interval: Duration,
    connectivity: ConnectivityWatch,
}

/// Handle to a spawned [`SyncDriver`].
pub struct DriverHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DriverHandle {
    /// Stops the driver after its current pass and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("sync driver task failed: {e}");
        }
    }
}

impl<R: RemoteLedger + 'static> SyncDriver<R> {
    #[must_use]
    pub fn new(ledger: Arc<OfflineLedger<R>>, interval: Duration) -> Self {
        let connectivity = ledger.connectivity().subscribe();
        Self {
            ledger,
            wallets: Vec::new(),
            interval,
            connectivity,
        }
    }

    /// Restricts the driver to the given wallets.
    #[must_use]
    pub fn with_wallets(mut self, wallets: Vec<WalletId>) -> Self {
        self.wallets = wallets;
        self
    }

    /// Spawns the driver loop onto the current runtime.
    pub fn spawn(self) -> DriverHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        DriverHandle { shutdown, task }
    }

    /// Runs until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if *shutdown.borrow() {
                break;
            }

            if !self.connectivity.is_online() {
                info!("offline, sync waits for connectivity");
                tokio::select! {
                    online = self.connectivity.wait_online() => {
                        if !online {
                            break;
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }

            let delay = match self.pass().await {
                PassOutcome::Clean => {
                    backoff = INITIAL_BACKOFF;
                    self.interval
                }
                PassOutcome::Failed => {
                    let delay = backoff;
                    info!(backoff_secs = delay.as_secs(), "sync pass failed, backing off");
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    delay
                }
            };

            match self.wait(delay, &mut shutdown).await {
                Wake::Timer | Wake::ConnectivityChanged => {}
                Wake::Shutdown => break,
            }
        }

        info!("sync driver shutting down");
    }

    async fn wait(&mut self, delay: Duration, shutdown: &mut watch::Receiver<bool>) -> Wake {
        tokio::select! {
            () = tokio::time::sleep(delay) => Wake::Timer,
            changed = self.connectivity.changed() => match changed {
                Some(_) => Wake::ConnectivityChanged,
                None => Wake::Shutdown,
            },
            _ = shutdown.changed() => Wake::Shutdown,
        }
    }

    async fn pass(&self) -> PassOutcome {
        let results = if self.wallets.is_empty() {
            self.ledger.sync_all().await
        } else {
            let mut results = Vec::with_capacity(self.wallets.len());
            for wallet_id in &self.wallets {
                results.push((wallet_id.clone(), self.ledger.run_sync(wallet_id).await));
            }
            results
        };

        let mut outcome = PassOutcome::Clean;
        for (wallet_id, result) in results {
            match result {
                Ok(report) if report.stopped_early => outcome = PassOutcome::Failed,
                Ok(_) => {}
                // A manual sync is already handling this wallet.
                Err(OffpayError::SyncInProgress(_)) => {}
                Err(e) => {
                    warn!(wallet_id = %wallet_id, kind = e.kind(), "sync failed: {e}");
                    outcome = PassOutcome::Failed;
                }
            }
        }
        outcome
    }
}
