//! Offline transaction admission, cancellation, and user retry.
//!
//! Each operation is a single unit of work on the [`LedgerStore`]: it reads
//! the wallet projection and today's counter, checks policy, and writes the
//! transaction, projection, and counter together. A rejection or a storage
//! failure leaves the store exactly as it was. No network I/O happens here,
//! so admission keeps working offline.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::models::transaction::new_reference_id;
use crate::models::{
    Money, Origin, Transaction, TransactionId, TransactionKind, TransactionState,
    TransferMethod, WalletId,
};
use crate::policy::config::LedgerPolicy;
use crate::policy::{self, RejectionReason};
use crate::store::{LedgerStore, StorageError};

/// A proposed transaction from payment-initiation code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmitRequest {
    pub wallet_id: WalletId,
    pub amount: Money,
    pub kind: TransactionKind,
    pub method: TransferMethod,
    pub receiver_wallet_id: Option<WalletId>,
    pub merchant_id: Option<String>,
    pub description: Option<String>,
}

impl AdmitRequest {
    #[must_use]
    pub fn new(
        wallet_id: WalletId,
        amount: Money,
        kind: TransactionKind,
        method: TransferMethod,
    ) -> Self {
        Self {
            wallet_id,
            amount,
            kind,
            method,
            receiver_wallet_id: None,
            merchant_id: None,
            description: None,
        }
    }

    /// Shorthand for a payment.
    #[must_use]
    pub fn payment(wallet_id: WalletId, amount: Money, method: TransferMethod) -> Self {
        Self::new(wallet_id, amount, TransactionKind::Payment, method)
    }

    #[must_use]
    pub fn to_receiver(mut self, receiver: WalletId) -> Self {
        self.receiver_wallet_id = Some(receiver);
        self
    }

    #[must_use]
    pub fn at_merchant(mut self, merchant_id: impl Into<String>) -> Self {
        self.merchant_id = Some(merchant_id.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Admission failed.
#[derive(Debug, thiserror::Error)]
pub enum AdmitError {
    #[error("payment rejected: {0}")]
    Rejected(RejectionReason),

    #[error("unknown wallet {0}")]
    UnknownWallet(WalletId),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl AdmitError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Rejected(reason) => reason.kind(),
            Self::UnknownWallet(_) => "unknown_wallet",
            Self::Storage(_) => "storage",
        }
    }

    /// The policy rejection, if that is why admission failed.
    #[must_use]
    pub fn rejection(&self) -> Option<&RejectionReason> {
        match self {
            Self::Rejected(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Cancellation failed.
#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    #[error("transaction {0} not found")]
    NotFound(TransactionId),

    /// Only `Pending` transactions can be cancelled.
    #[error("transaction {id} is {state} and cannot be cancelled")]
    NotCancellable {
        id: TransactionId,
        state: TransactionState,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl CancelError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "transaction_not_found",
            Self::NotCancellable { .. } => "not_cancellable",
            Self::Storage(_) => "storage",
        }
    }
}

/// User retry of a failed transaction failed.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("transaction {0} not found")]
    NotFound(TransactionId),

    /// Only `Failed` transactions can be retried.
    #[error("transaction {id} is {state} and cannot be retried")]
    NotRetryable {
        id: TransactionId,
        state: TransactionState,
    },

    #[error("retry rejected: {0}")]
    Rejected(RejectionReason),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl RetryError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "transaction_not_found",
            Self::NotRetryable { .. } => "not_retryable",
            Self::Rejected(reason) => reason.kind(),
            Self::Storage(_) => "storage",
        }
    }
}

/// Admits a proposed transaction into the local queue.
///
/// On success the transaction is `Pending`, the wallet's offline balance is
/// reduced by the amount, and today's counters include it; all of this is
/// committed atomically.
///
/// # Errors
///
/// [`AdmitError::Rejected`] with the first failing policy check, or a
/// storage/unknown-wallet error. The store is unchanged in every error case.
pub fn admit(
    store: &LedgerStore,
    policy: &LedgerPolicy,
    request: &AdmitRequest,
    offline: bool,
    now: DateTime<Utc>,
) -> Result<Transaction, AdmitError> {
    let result: Result<Transaction, AdmitError> = store.unit_of_work(|unit| {
        let mut wallet = unit
            .wallet(&request.wallet_id)
            .ok_or_else(|| AdmitError::UnknownWallet(request.wallet_id.clone()))?;
        let mut counter = unit.counter(&wallet.wallet_id, policy.calendar_date(now));

        policy::check_admission(&wallet, &counter, request.amount, offline, now)
            .map_err(AdmitError::Rejected)?;

        let tx = Transaction {
            id: TransactionId::generate(),
            admission_seq: unit.next_admission_seq(),
            reference_id: new_reference_id(now),
            sender_wallet_id: wallet.wallet_id.clone(),
            receiver_wallet_id: request.receiver_wallet_id.clone(),
            merchant_id: request.merchant_id.clone(),
            amount: request.amount,
            description: request.description.clone(),
            kind: request.kind,
            method: request.method,
            origin: Origin::Local,
            offline,
            state: TransactionState::Pending,
            created_offline_at: now,
            synced_at: None,
            cancelled_at: None,
            remote_id: None,
            retry_count: 0,
            last_error: None,
        };

        wallet.reserve(request.amount, policy.deadline_after(now));
        counter.record(request.amount, offline);

        unit.put_transaction(tx.clone());
        unit.put_wallet(wallet);
        unit.put_counter(counter);
        Ok(tx)
    });

    match &result {
        Ok(tx) => info!(
            wallet_id = %tx.sender_wallet_id,
            transaction_id = %tx.id,
            reference_id = %tx.reference_id,
            amount = tx.amount,
            offline,
            "transaction admitted"
        ),
        Err(e) => warn!(
            wallet_id = %request.wallet_id,
            amount = request.amount,
            kind = e.kind(),
            "admission refused: {e}"
        ),
    }
    result
}

/// Cancels a `Pending` transaction, crediting its amount back.
///
/// # Errors
///
/// [`CancelError::NotCancellable`] if the transaction is in flight or
/// already settled or failed.
pub fn cancel(
    store: &LedgerStore,
    id: TransactionId,
    now: DateTime<Utc>,
) -> Result<Transaction, CancelError> {
    let tx = store.unit_of_work(|unit| {
        let mut tx = unit.transaction(&id).ok_or(CancelError::NotFound(id))?;
        if tx.state != TransactionState::Pending {
            return Err(CancelError::NotCancellable {
                id,
                state: tx.state,
            });
        }
        let mut wallet = unit.wallet(&tx.sender_wallet_id).ok_or_else(|| {
            StorageError::Corrupt(format!(
                "transaction {id} references missing wallet {}",
                tx.sender_wallet_id
            ))
        })?;

        tx.transition(TransactionState::Cancelled)
            .map_err(|_| CancelError::NotCancellable { id, state: tx.state })?;
        tx.cancelled_at = Some(now);
        wallet.release(tx.amount);

        unit.put_transaction(tx.clone());
        unit.put_wallet(wallet);
        Ok(tx)
    })?;

    info!(
        wallet_id = %tx.sender_wallet_id,
        transaction_id = %tx.id,
        amount = tx.amount,
        "transaction cancelled"
    );
    Ok(tx)
}

/// Re-queues a `Failed` transaction at the user's request.
///
/// The same reference id is reused, so a copy that did reach the remote
/// ledger is recognised as a duplicate on the next sync. The retry counter
/// starts over.
///
/// # Errors
///
/// [`RetryError::Rejected`] if the wallet can no longer cover the amount,
/// is not active, or is past its sync deadline.
pub fn retry(
    store: &LedgerStore,
    policy: &LedgerPolicy,
    id: TransactionId,
    now: DateTime<Utc>,
) -> Result<Transaction, RetryError> {
    let tx = store.unit_of_work(|unit| {
        let mut tx = unit.transaction(&id).ok_or(RetryError::NotFound(id))?;
        if tx.state != TransactionState::Failed {
            return Err(RetryError::NotRetryable {
                id,
                state: tx.state,
            });
        }
        let mut wallet = unit.wallet(&tx.sender_wallet_id).ok_or_else(|| {
            StorageError::Corrupt(format!(
                "transaction {id} references missing wallet {}",
                tx.sender_wallet_id
            ))
        })?;

        policy::check_requeue(&wallet, tx.amount, now).map_err(RetryError::Rejected)?;

        tx.transition(TransactionState::Pending)
            .map_err(|_| RetryError::NotRetryable { id, state: tx.state })?;
        tx.retry_count = 0;
        tx.last_error = None;
        wallet.reserve(tx.amount, policy.deadline_after(now));

        unit.put_transaction(tx.clone());
        unit.put_wallet(wallet);
        Ok(tx)
    })?;

    info!(
        wallet_id = %tx.sender_wallet_id,
        transaction_id = %tx.id,
        reference_id = %tx.reference_id,
        "failed transaction re-queued"
    );
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RemoteWallet, WalletProjection, WalletStatus};
    use crate::store::Fault;
    use chrono::Duration;

    fn remote() -> RemoteWallet {
        RemoteWallet {
            wallet_id: WalletId::new("w1"),
            user_id: "u1".to_string(),
            address: "alice@offpay".to_string(),
            balance: 500_000,
            max_balance: 2_000_000,
            max_transaction_amount: 100_000,
            max_daily_transaction_count: 10,
            max_offline_transaction_count: 3,
            status: WalletStatus::Active,
        }
    }

    fn seeded(store: &LedgerStore, now: DateTime<Utc>) {
        store
            .unit_of_work(|unit| {
                unit.put_wallet(WalletProjection::from_remote(&remote(), now));
                Ok::<_, StorageError>(())
            })
            .unwrap();
    }

    fn wallet(store: &LedgerStore) -> WalletProjection {
        store
            .read(|s| s.wallet(&WalletId::new("w1")).cloned())
            .unwrap()
            .unwrap()
    }

    fn pay(amount: Money) -> AdmitRequest {
        AdmitRequest::payment(WalletId::new("w1"), amount, TransferMethod::Qr)
    }

    #[test]
    fn admit_debits_and_starts_deadline() {
        let store = LedgerStore::in_memory();
        let policy = LedgerPolicy::default();
        let now = Utc::now();
        seeded(&store, now);

        let tx = admit(&store, &policy, &pay(10_000), true, now).unwrap();
        assert_eq!(tx.state, TransactionState::Pending);
        assert!(tx.offline);

        let w = wallet(&store);
        assert_eq!(w.local_balance, 490_000);
        assert_eq!(w.server_balance, 500_000);
        assert_eq!(w.pending_count, 1);
        assert_eq!(w.sync_deadline, Some(now + Duration::days(4)));

        let counter = store
            .read(|s| s.counter(&WalletId::new("w1"), policy.calendar_date(now)).cloned())
            .unwrap()
            .unwrap();
        assert_eq!(counter.transaction_count, 1);
        assert_eq!(counter.offline_transaction_count, 1);
        assert_eq!(counter.total_amount, 10_000);
    }

    #[test]
    fn admission_sequence_is_monotonic_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let policy = LedgerPolicy::default();
        let now = Utc::now();
        let seqs = {
            let store = LedgerStore::open(dir.path(), 64).unwrap();
            seeded(&store, now);
            [
                admit(&store, &policy, &pay(1_000), true, now).unwrap(),
                admit(&store, &policy, &pay(2_000), true, now).unwrap(),
            ]
            .map(|tx| tx.admission_seq)
        };
        assert_eq!(seqs, [1, 2]);

        let store = LedgerStore::open(dir.path(), 64).unwrap();
        let third = admit(&store, &policy, &pay(3_000), true, now).unwrap();
        assert_eq!(third.admission_seq, 3);
    }

    #[test]
    fn second_admission_keeps_deadline() {
        let store = LedgerStore::in_memory();
        let policy = LedgerPolicy::default();
        let now = Utc::now();
        seeded(&store, now);

        admit(&store, &policy, &pay(1_000), true, now).unwrap();
        let first_deadline = wallet(&store).sync_deadline;
        admit(&store, &policy, &pay(1_000), true, now + Duration::hours(5)).unwrap();
        assert_eq!(wallet(&store).sync_deadline, first_deadline);
    }

    #[test]
    fn rejection_leaves_state_unchanged() {
        let store = LedgerStore::in_memory();
        let policy = LedgerPolicy::default();
        let now = Utc::now();
        seeded(&store, now);
        let before = wallet(&store);
        let seq = store.seq().unwrap();

        let err = admit(&store, &policy, &pay(150_000), true, now).unwrap_err();
        assert!(matches!(
            err.rejection(),
            Some(RejectionReason::ExceedsPerTransactionLimit { .. })
        ));
        assert_eq!(err.kind(), "exceeds_per_transaction_limit");
        assert_eq!(wallet(&store), before);
        assert_eq!(store.seq().unwrap(), seq);
    }

    #[test]
    fn offline_count_limit_enforced() {
        let store = LedgerStore::in_memory();
        let policy = LedgerPolicy::default();
        let now = Utc::now();
        seeded(&store, now);

        for _ in 0..3 {
            admit(&store, &policy, &pay(100), true, now).unwrap();
        }
        let err = admit(&store, &policy, &pay(100), true, now).unwrap_err();
        assert_eq!(err.kind(), "offline_limit_exceeded");

        // Online admissions only count against the daily limit.
        admit(&store, &policy, &pay(100), false, now).unwrap();
    }

    #[test]
    fn deadline_exceeded_blocks_everything() {
        let store = LedgerStore::in_memory();
        let policy = LedgerPolicy::default();
        let now = Utc::now();
        seeded(&store, now);

        admit(&store, &policy, &pay(100), true, now).unwrap();
        let later = now + Duration::days(4) + Duration::seconds(1);
        let err = admit(&store, &policy, &pay(100), false, later).unwrap_err();
        assert_eq!(err.kind(), "sync_deadline_exceeded");
    }

    #[test]
    fn unknown_wallet() {
        let store = LedgerStore::in_memory();
        let err = admit(
            &store,
            &LedgerPolicy::default(),
            &pay(100),
            true,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, AdmitError::UnknownWallet(_)));
    }

    #[test]
    fn cancel_credits_back_and_clears_deadline() {
        let store = LedgerStore::in_memory();
        let policy = LedgerPolicy::default();
        let now = Utc::now();
        seeded(&store, now);

        let tx = admit(&store, &policy, &pay(10_000), true, now).unwrap();
        let cancelled = cancel(&store, tx.id, now).unwrap();
        assert_eq!(cancelled.state, TransactionState::Cancelled);
        assert_eq!(cancelled.cancelled_at, Some(now));

        let w = wallet(&store);
        assert_eq!(w.local_balance, 500_000);
        assert_eq!(w.pending_count, 0);
        assert!(w.sync_deadline.is_none());

        let again = cancel(&store, tx.id, now).unwrap_err();
        assert_eq!(again.kind(), "not_cancellable");
    }

    #[test]
    fn cannot_cancel_in_flight() {
        let store = LedgerStore::in_memory();
        let policy = LedgerPolicy::default();
        let now = Utc::now();
        seeded(&store, now);

        let mut tx = admit(&store, &policy, &pay(10_000), true, now).unwrap();
        tx.transition(TransactionState::SyncInFlight).unwrap();
        store
            .unit_of_work(|unit| {
                unit.put_transaction(tx.clone());
                Ok::<_, StorageError>(())
            })
            .unwrap();

        let err = cancel(&store, tx.id, now).unwrap_err();
        assert!(matches!(
            err,
            CancelError::NotCancellable {
                state: TransactionState::SyncInFlight,
                ..
            }
        ));
        assert_eq!(wallet(&store).local_balance, 490_000);
    }

    #[test]
    fn retry_requeues_failed_transaction() {
        let store = LedgerStore::in_memory();
        let policy = LedgerPolicy::default();
        let now = Utc::now();
        seeded(&store, now);

        let mut tx = admit(&store, &policy, &pay(10_000), true, now).unwrap();
        store
            .unit_of_work(|unit| {
                tx.transition(TransactionState::Failed).unwrap();
                tx.retry_count = 5;
                tx.last_error = Some("timeout".into());
                let mut w = unit.wallet(&tx.sender_wallet_id).unwrap();
                w.release(tx.amount);
                unit.put_wallet(w);
                unit.put_transaction(tx.clone());
                Ok::<_, StorageError>(())
            })
            .unwrap();
        assert_eq!(wallet(&store).local_balance, 500_000);

        let later = now + Duration::hours(1);
        let retried = retry(&store, &policy, tx.id, later).unwrap();
        assert_eq!(retried.state, TransactionState::Pending);
        assert_eq!(retried.retry_count, 0);
        assert!(retried.last_error.is_none());
        assert_eq!(retried.reference_id, tx.reference_id);

        let w = wallet(&store);
        assert_eq!(w.local_balance, 490_000);
        assert_eq!(w.pending_count, 1);
        assert_eq!(w.sync_deadline, Some(later + Duration::days(4)));

        let err = retry(&store, &policy, tx.id, later).unwrap_err();
        assert_eq!(err.kind(), "not_retryable");
    }

    #[test]
    fn storage_failure_leaves_no_partial_admission() {
        let store = LedgerStore::in_memory();
        let policy = LedgerPolicy::default();
        let now = Utc::now();
        seeded(&store, now);
        let before = wallet(&store);

        store.inject_fault(Fault::FailBeforeAppend);
        let err = admit(&store, &policy, &pay(10_000), true, now).unwrap_err();
        assert_eq!(err.kind(), "storage");
        assert_eq!(wallet(&store), before);
        assert_eq!(store.read(|s| s.transactions().count()).unwrap(), 0);
        assert!(
            store
                .read(|s| s.counter(&WalletId::new("w1"), policy.calendar_date(now)).is_none())
                .unwrap()
        );
    }

    #[test]
    fn crash_mid_commit_restores_pre_admission_state() {
        let dir = tempfile::tempdir().unwrap();
        let policy = LedgerPolicy::default();
        let now = Utc::now();
        let before = {
            let store = LedgerStore::open(dir.path(), 64).unwrap();
            seeded(&store, now);
            admit(&store, &policy, &pay(1_000), true, now).unwrap();
            let before = wallet(&store);

            store.inject_fault(Fault::TornAppend);
            assert!(admit(&store, &policy, &pay(10_000), true, now).is_err());
            before
        };

        let store = LedgerStore::open(dir.path(), 64).unwrap();
        assert_eq!(wallet(&store), before);
        assert_eq!(store.read(|s| s.transactions().count()).unwrap(), 1);
        let counter = store
            .read(|s| s.counter(&WalletId::new("w1"), policy.calendar_date(now)).cloned())
            .unwrap()
            .unwrap();
        assert_eq!(counter.transaction_count, 1);
    }
}
