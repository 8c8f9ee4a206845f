//! The offline ledger facade.
//!
//! [`OfflineLedger`] ties the store, policy, remote ledger, clock and
//! connectivity signal together and is what payment-initiation and
//! presentation code talks to. Admission, cancel and retry never touch the
//! network; only [`run_sync`](OfflineLedger::run_sync) and
//! [`register_wallet`](OfflineLedger::register_wallet) do.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::admission::{self, AdmitRequest};
use crate::clock::{Clock, SystemClock};
use crate::models::{Transaction, TransactionId, TransactionState, WalletId, WalletProjection};
use crate::monitor::{self, WalletStatusReport};
use crate::policy::config::LedgerPolicy;
use crate::store::{LedgerStore, StorageError};
use crate::sync::{Connectivity, RemoteLedger, SyncReport, reconcile_wallet};
use crate::{OffpayError, Result};

/// What [`OfflineLedger::recover`] repaired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// In-flight transactions put back to `Pending`.
    pub reset_in_flight: usize,
    pub wallets_rebased: usize,
}

/// Removes a wallet from the in-progress set when its sync pass ends,
/// including when the pass future is dropped.
struct SyncGuard<'a> {
    syncing: &'a Mutex<HashSet<WalletId>>,
    wallet_id: WalletId,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        let mut syncing = self.syncing.lock().unwrap_or_else(|e| e.into_inner());
        syncing.remove(&self.wallet_id);
    }
}

/// Offline-first payment ledger for one device.
pub struct OfflineLedger<R> {
    store: LedgerStore,
    remote: R,
    policy: LedgerPolicy,
    clock: Arc<dyn Clock>,
    connectivity: Connectivity,
    syncing: Mutex<HashSet<WalletId>>,
}

impl<R: RemoteLedger> OfflineLedger<R> {
    /// Wraps an already-open store. Starts offline with the system clock.
    #[must_use]
    pub fn new(store: LedgerStore, remote: R, policy: LedgerPolicy) -> Self {
        Self {
            store,
            remote,
            policy,
            clock: Arc::new(SystemClock),
            connectivity: Connectivity::default(),
            syncing: Mutex::new(HashSet::new()),
        }
    }

    /// Opens the durable store in `dir` and runs startup recovery.
    ///
    /// # Errors
    ///
    /// Returns a config error for an unusable policy, or a storage error if
    /// the store cannot be opened or repaired.
    pub fn open(dir: &Path, remote: R, policy: LedgerPolicy) -> Result<Self> {
        policy.validate()?;
        let store = LedgerStore::open(dir, policy.compact_every)?;
        let ledger = Self::new(store, remote, policy);
        ledger.recover()?;
        Ok(ledger)
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    #[must_use]
    pub fn policy(&self) -> &LedgerPolicy {
        &self.policy
    }

    #[must_use]
    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    #[must_use]
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Repairs state left by an interrupted process.
    ///
    /// In-flight transactions have an unknown outcome and go back to
    /// `Pending`; every projection is re-derived from its last known server
    /// balance and its queued debits.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the repair cannot be committed.
    pub fn recover(&self) -> Result<RecoveryReport> {
        let report = self.store.unit_of_work(|unit| {
            let mut report = RecoveryReport::default();
            for wallet_id in unit.wallet_ids() {
                for mut tx in unit.wallet_transactions(&wallet_id) {
                    if tx.state == TransactionState::SyncInFlight {
                        tx.transition(TransactionState::Pending)
                            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
                        unit.put_transaction(tx);
                        report.reset_in_flight += 1;
                    }
                }

                let Some(mut wallet) = unit.wallet(&wallet_id) else {
                    continue;
                };
                let (outstanding, pending) = unit.outstanding(&wallet_id);
                let before = wallet.clone();
                wallet.rebase(wallet.server_balance, outstanding, pending);
                if wallet != before {
                    warn!(
                        wallet_id = %wallet_id,
                        local_balance = wallet.local_balance,
                        previous = before.local_balance,
                        "projection drifted, re-based"
                    );
                    unit.put_wallet(wallet);
                    report.wallets_rebased += 1;
                }
            }
            Ok::<_, OffpayError>(report)
        })?;

        if report != RecoveryReport::default() {
            info!(
                reset_in_flight = report.reset_in_flight,
                wallets_rebased = report.wallets_rebased,
                "startup recovery repaired ledger"
            );
        }
        Ok(report)
    }

    /// Pulls a wallet from the remote ledger and stores its projection.
    ///
    /// An existing projection keeps its queued debits and deadline.
    ///
    /// # Errors
    ///
    /// Returns a remote error if the wallet cannot be fetched.
    pub async fn register_wallet(&self, wallet_id: &WalletId) -> Result<WalletProjection> {
        let remote = self.remote.fetch_wallet(wallet_id).await?;
        let now = self.clock.now();
        let wallet = self.store.unit_of_work(|unit| {
            let wallet = match unit.wallet(wallet_id) {
                Some(mut existing) => {
                    let (outstanding, pending) = unit.outstanding(wallet_id);
                    existing.apply_remote_limits(&remote);
                    existing.rebase(remote.balance, outstanding, pending);
                    existing.last_sync_at = Some(now);
                    existing
                }
                None => WalletProjection::from_remote(&remote, now),
            };
            unit.put_wallet(wallet.clone());
            Ok::<_, OffpayError>(wallet)
        })?;

        info!(
            wallet_id = %wallet_id,
            balance = wallet.server_balance,
            status = wallet.status.as_str(),
            "wallet registered"
        );
        Ok(wallet)
    }

    /// Admits a transaction. It is tagged offline unless the connectivity
    /// signal currently reports the network as reachable.
    ///
    /// # Errors
    ///
    /// See [`admission::admit`].
    pub fn admit(&self, request: &AdmitRequest) -> Result<Transaction> {
        let offline = !self.connectivity.is_online();
        Ok(admission::admit(
            &self.store,
            &self.policy,
            request,
            offline,
            self.clock.now(),
        )?)
    }

    /// Current offline state of a wallet.
    ///
    /// # Errors
    ///
    /// Returns [`OffpayError::UnknownWallet`] if the wallet is not registered.
    pub fn get_status(&self, wallet_id: &WalletId) -> Result<WalletStatusReport> {
        let now = self.clock.now();
        let date = self.policy.calendar_date(now);
        self.store
            .read(|state| {
                let wallet = state.wallet(wallet_id)?;
                let report = match state.counter(wallet_id, date) {
                    Some(counter) => monitor::derive_status(wallet, counter, now),
                    None => monitor::derive_status(
                        wallet,
                        &crate::models::DailyCounter::empty(wallet_id.clone(), date),
                        now,
                    ),
                };
                Some(report)
            })?
            .ok_or_else(|| OffpayError::UnknownWallet(wallet_id.clone()))
    }

    /// Runs one reconciliation pass for a wallet.
    ///
    /// # Errors
    ///
    /// Returns [`OffpayError::SyncInProgress`] if a pass for this wallet is
    /// already running, or whatever [`reconcile_wallet`] fails with.
    pub async fn run_sync(&self, wallet_id: &WalletId) -> Result<SyncReport> {
        let _guard = self.begin_sync(wallet_id)?;
        reconcile_wallet(
            &self.store,
            &self.remote,
            &self.policy,
            self.clock.as_ref(),
            wallet_id,
        )
        .await
    }

    fn begin_sync(&self, wallet_id: &WalletId) -> Result<SyncGuard<'_>> {
        let mut syncing = self.syncing.lock().unwrap_or_else(|e| e.into_inner());
        if !syncing.insert(wallet_id.clone()) {
            return Err(OffpayError::SyncInProgress(wallet_id.clone()));
        }
        Ok(SyncGuard {
            syncing: &self.syncing,
            wallet_id: wallet_id.clone(),
        })
    }

    /// Runs a pass for every registered wallet. One wallet failing does not
    /// stop the others.
    pub async fn sync_all(&self) -> Vec<(WalletId, Result<SyncReport>)> {
        let wallet_ids = match self.wallet_ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "cannot list wallets for sync");
                return Vec::new();
            }
        };
        let mut results = Vec::with_capacity(wallet_ids.len());
        for wallet_id in wallet_ids {
            let result = self.run_sync(&wallet_id).await;
            results.push((wallet_id, result));
        }
        results
    }

    /// Cancels a `Pending` transaction.
    ///
    /// # Errors
    ///
    /// See [`admission::cancel`].
    pub fn cancel(&self, id: TransactionId) -> Result<Transaction> {
        Ok(admission::cancel(&self.store, id, self.clock.now())?)
    }

    /// Re-queues a `Failed` transaction.
    ///
    /// # Errors
    ///
    /// See [`admission::retry`].
    pub fn retry(&self, id: TransactionId) -> Result<Transaction> {
        Ok(admission::retry(
            &self.store,
            &self.policy,
            id,
            self.clock.now(),
        )?)
    }

    /// Deletes `Synced` and `Cancelled` transactions settled longer ago than
    /// the retention period. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the deletion cannot be committed.
    pub fn purge_settled(&self) -> Result<usize> {
        let cutoff = self.policy.retention_cutoff(self.clock.now());
        let purged = self.store.unit_of_work(|unit| {
            let mut purged = 0usize;
            for wallet_id in unit.wallet_ids() {
                for tx in unit.wallet_transactions(&wallet_id) {
                    if tx.settled_at().is_some_and(|at| at < cutoff) {
                        unit.delete_transaction(tx.id);
                        purged += 1;
                    }
                }
            }
            Ok::<_, OffpayError>(purged)
        })?;
        if purged > 0 {
            info!(purged, cutoff = %cutoff, "purged settled transactions");
        }
        Ok(purged)
    }

    /// A wallet's transactions, oldest first.
    pub fn transactions(&self, wallet_id: &WalletId) -> Result<Vec<Transaction>> {
        Ok(self
            .store
            .read(|s| s.wallet_transactions(wallet_id).cloned().collect())?)
    }

    pub fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        Ok(self.store.read(|s| s.transaction(&id).cloned())?)
    }

    pub fn transaction_by_reference(&self, reference_id: &str) -> Result<Option<Transaction>> {
        Ok(self
            .store
            .read(|s| s.transaction_by_reference(reference_id).cloned())?)
    }

    pub fn wallet_ids(&self) -> Result<Vec<WalletId>> {
        Ok(self
            .store
            .read(|s| s.wallets().map(|w| w.wallet_id.clone()).collect())?)
    }
}
