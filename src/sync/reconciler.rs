//! One reconciliation pass for one wallet.
//!
//! 1. Fetch the authoritative wallet record and adopt its limits and status.
//! 2. Submit every `Pending` transaction in admission order, applying each
//!    outcome in its own unit of work.
//! 3. Re-fetch the authoritative balance and re-base the projection on it.
//!
//! Every write is self-contained: a crash between two outcomes loses
//! neither, and re-applying an outcome to a transaction that already left
//! `SyncInFlight` is a no-op.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::remote::{RemoteLedger, SubmitOutcome, SubmitRequest};
use crate::clock::Clock;
use crate::models::{
    Money, RemoteWallet, TransactionId, TransactionState, WalletId, WalletProjection,
};
use crate::policy::config::LedgerPolicy;
use crate::store::{LedgerStore, StorageError, UnitOfWork};
use crate::{OffpayError, Result};

/// One transaction that did not reach `Synced` in this pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionFailure {
    pub transaction_id: TransactionId,
    pub reference_id: String,
    /// `"remote_rejected"`, `"remote_unreachable"` or `"retries_exhausted"`.
    pub kind: &'static str,
    pub message: String,
}

/// Aggregate result of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub wallet_id: WalletId,
    pub synced_count: usize,
    /// Transactions that ended the pass `Failed`.
    pub failed_count: usize,
    /// Transactions left `Pending` after an ambiguous failure.
    pub retried_count: usize,
    /// The pass gave up on this wallet after repeated ambiguous failures.
    pub stopped_early: bool,
    pub errors: Vec<TransactionFailure>,
    pub server_balance: Money,
    pub local_balance: Money,
    pub pending_count: u32,
}

impl SyncReport {
    fn new(wallet_id: WalletId) -> Self {
        Self {
            wallet_id,
            synced_count: 0,
            failed_count: 0,
            retried_count: 0,
            stopped_early: false,
            errors: Vec::new(),
            server_balance: 0,
            local_balance: 0,
            pending_count: 0,
        }
    }
}

/// What applying one submit outcome did.
enum Applied {
    Synced,
    Rejected(String),
    Retrying(String),
    Exhausted(String),
    /// The transaction was no longer in flight; nothing was written.
    Skipped,
}

/// Runs one reconciliation pass for `wallet_id`.
///
/// Callers must not run two passes for the same wallet concurrently.
///
/// # Errors
///
/// Fails only if the wallet is unknown, the initial fetch fails, or the
/// store fails. Remote submit failures are reported per transaction in the
/// returned [`SyncReport`] and never abort the pass.
pub async fn reconcile_wallet<R: RemoteLedger>(
    store: &LedgerStore,
    remote: &R,
    policy: &LedgerPolicy,
    clock: &dyn Clock,
    wallet_id: &WalletId,
) -> Result<SyncReport> {
    if store.read(|s| s.wallet(wallet_id).is_none())? {
        return Err(OffpayError::UnknownWallet(wallet_id.clone()));
    }

    let fetched = remote.fetch_wallet(wallet_id).await?;
    let queue = begin_pass(store, wallet_id, &fetched)?;
    info!(wallet_id = %wallet_id, queued = queue.len(), "sync pass started");

    let mut report = SyncReport::new(wallet_id.clone());
    let mut consecutive_failures = 0u32;

    for id in queue {
        if consecutive_failures >= policy.max_consecutive_failures {
            warn!(
                wallet_id = %wallet_id,
                consecutive_failures,
                "stopping sync pass after repeated failures"
            );
            report.stopped_early = true;
            break;
        }

        let Some(request) = mark_in_flight(store, id)? else {
            continue;
        };

        let outcome = match tokio::time::timeout(policy.submit_timeout(), remote.submit(&request))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => SubmitOutcome::Unreachable {
                message: format!(
                    "no answer within {}s",
                    policy.submit_timeout().as_secs()
                ),
            },
        };

        let failure = |kind: &'static str, message: String| TransactionFailure {
            transaction_id: id,
            reference_id: request.reference_id.clone(),
            kind,
            message,
        };

        match apply_outcome(store, policy, id, &outcome, clock.now())? {
            Applied::Synced => {
                report.synced_count += 1;
                consecutive_failures = 0;
            }
            Applied::Rejected(reason) => {
                report.failed_count += 1;
                consecutive_failures = 0;
                report.errors.push(failure("remote_rejected", reason));
            }
            Applied::Retrying(message) => {
                report.retried_count += 1;
                consecutive_failures += 1;
                report.errors.push(failure("remote_unreachable", message));
            }
            Applied::Exhausted(message) => {
                report.failed_count += 1;
                consecutive_failures += 1;
                report.errors.push(failure("retries_exhausted", message));
            }
            Applied::Skipped => {}
        }
    }

    let authoritative = match remote.fetch_wallet(wallet_id).await {
        Ok(wallet) => Some(wallet),
        Err(e) => {
            warn!(
                wallet_id = %wallet_id,
                error = %e,
                "re-fetch failed, re-basing on the balance known locally"
            );
            None
        }
    };
    let wallet = rebase(store, wallet_id, authoritative.as_ref(), clock.now())?;

    report.server_balance = wallet.server_balance;
    report.local_balance = wallet.local_balance;
    report.pending_count = wallet.pending_count;

    info!(
        wallet_id = %wallet_id,
        synced = report.synced_count,
        failed = report.failed_count,
        retried = report.retried_count,
        stopped_early = report.stopped_early,
        local_balance = report.local_balance,
        "sync pass finished"
    );
    Ok(report)
}

fn load_wallet(unit: &UnitOfWork<'_>, wallet_id: &WalletId) -> Result<WalletProjection> {
    unit.wallet(wallet_id)
        .ok_or_else(|| OffpayError::UnknownWallet(wallet_id.clone()))
}

/// Adopts the fetched limits and returns the wallet's `Pending` queue.
///
/// A transaction still `SyncInFlight` here was left behind by an interrupted
/// pass; its outcome is unknown, so it goes back to `Pending` and is
/// resubmitted under the same reference id.
fn begin_pass(
    store: &LedgerStore,
    wallet_id: &WalletId,
    fetched: &RemoteWallet,
) -> Result<Vec<TransactionId>> {
    store.unit_of_work(|unit| {
        let mut wallet = load_wallet(unit, wallet_id)?;
        wallet.apply_remote_limits(fetched);
        unit.put_wallet(wallet);

        let mut queue = Vec::new();
        for mut tx in unit.wallet_transactions(wallet_id) {
            if tx.state == TransactionState::SyncInFlight {
                tx.transition(TransactionState::Pending)
                    .map_err(|e| StorageError::Corrupt(e.to_string()))?;
                debug!(transaction_id = %tx.id, "resetting stale in-flight transaction");
                unit.put_transaction(tx.clone());
            }
            if tx.state == TransactionState::Pending {
                queue.push(tx.id);
            }
        }
        Ok(queue)
    })
}

/// Moves a `Pending` transaction to `SyncInFlight`.
///
/// Returns `None` if it is no longer pending (cancelled in the meantime).
fn mark_in_flight(store: &LedgerStore, id: TransactionId) -> Result<Option<SubmitRequest>> {
    store.unit_of_work(|unit| {
        let Some(mut tx) = unit.transaction(&id) else {
            return Ok(None);
        };
        if tx.state != TransactionState::Pending {
            return Ok(None);
        }
        tx.transition(TransactionState::SyncInFlight)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let request = SubmitRequest::from(&tx);
        unit.put_transaction(tx);
        Ok(Some(request))
    })
}

fn apply_outcome(
    store: &LedgerStore,
    policy: &LedgerPolicy,
    id: TransactionId,
    outcome: &SubmitOutcome,
    now: DateTime<Utc>,
) -> Result<Applied> {
    store.unit_of_work(|unit| {
        let Some(mut tx) = unit.transaction(&id) else {
            return Ok(Applied::Skipped);
        };
        if tx.state != TransactionState::SyncInFlight {
            return Ok(Applied::Skipped);
        }
        let mut wallet = load_wallet(unit, &tx.sender_wallet_id)?;
        let corrupt = |e: crate::models::transaction::InvalidTransition| {
            StorageError::Corrupt(e.to_string())
        };

        let applied = match outcome {
            SubmitOutcome::Accepted { remote_id } | SubmitOutcome::RejectedDuplicate { remote_id } => {
                tx.transition(TransactionState::Synced).map_err(corrupt)?;
                tx.synced_at = Some(now);
                tx.remote_id = Some(remote_id.clone());
                tx.last_error = None;
                wallet.settle(tx.amount);
                info!(
                    transaction_id = %tx.id,
                    reference_id = %tx.reference_id,
                    remote_id = %remote_id,
                    duplicate = matches!(outcome, SubmitOutcome::RejectedDuplicate { .. }),
                    "transaction synced"
                );
                Applied::Synced
            }
            SubmitOutcome::RejectedPolicy { reason } => {
                tx.transition(TransactionState::Failed).map_err(corrupt)?;
                tx.last_error = Some(reason.clone());
                wallet.release(tx.amount);
                warn!(
                    transaction_id = %tx.id,
                    reference_id = %tx.reference_id,
                    reason = %reason,
                    "transaction rejected by remote ledger"
                );
                Applied::Rejected(reason.clone())
            }
            SubmitOutcome::Unreachable { message } => {
                tx.retry_count += 1;
                tx.last_error = Some(message.clone());
                if tx.retry_count >= policy.max_retries {
                    tx.transition(TransactionState::Failed).map_err(corrupt)?;
                    wallet.release(tx.amount);
                    warn!(
                        transaction_id = %tx.id,
                        retry_count = tx.retry_count,
                        "retries exhausted, transaction failed"
                    );
                    Applied::Exhausted(message.clone())
                } else {
                    tx.transition(TransactionState::Pending).map_err(corrupt)?;
                    debug!(
                        transaction_id = %tx.id,
                        retry_count = tx.retry_count,
                        "ambiguous submit failure, will retry"
                    );
                    Applied::Retrying(message.clone())
                }
            }
        };

        if !matches!(applied, Applied::Retrying(_)) {
            unit.put_wallet(wallet);
        }
        unit.put_transaction(tx);
        Ok(applied)
    })
}

/// Re-derives the projection from the authoritative balance (or the last
/// known one) and the still-queued debits.
fn rebase(
    store: &LedgerStore,
    wallet_id: &WalletId,
    authoritative: Option<&RemoteWallet>,
    now: DateTime<Utc>,
) -> Result<WalletProjection> {
    store.unit_of_work(|unit| {
        let mut wallet = load_wallet(unit, wallet_id)?;
        let server_balance = match authoritative {
            Some(remote) => {
                wallet.apply_remote_limits(remote);
                remote.balance
            }
            None => wallet.server_balance,
        };
        let (outstanding, pending) = unit.outstanding(wallet_id);
        wallet.rebase(server_balance, outstanding, pending);
        wallet.last_sync_at = Some(now);
        unit.put_wallet(wallet.clone());
        Ok(wallet)
    })
}
