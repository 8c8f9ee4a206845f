//! Wallet projection models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Money, WalletId};

/// Lifecycle status of a wallet as reported by the remote ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    Active,
    Frozen,
    Suspended,
    Closed,
}

impl WalletStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Frozen => "frozen",
            Self::Suspended => "suspended",
            Self::Closed => "closed",
        }
    }
}

/// Authoritative wallet record returned by the remote wallet fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteWallet {
    pub wallet_id: WalletId,
    pub user_id: String,
    /// Payment address (e.g. a VPA-style handle).
    pub address: String,
    pub balance: Money,
    pub max_balance: Money,
    pub max_transaction_amount: Money,
    pub max_daily_transaction_count: u32,
    pub max_offline_transaction_count: u32,
    pub status: WalletStatus,
}

/// The client's local belief about one wallet.
///
/// `local_balance` always equals `server_balance` minus the amounts of the
/// wallet's queued (`Pending` or `SyncInFlight`) local transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletProjection {
    pub wallet_id: WalletId,
    pub user_id: String,
    pub address: String,
    /// Last known authoritative balance.
    pub server_balance: Money,
    /// Offline balance: server balance minus outstanding local debits.
    pub local_balance: Money,
    pub max_balance: Money,
    pub max_transaction_amount: Money,
    pub max_daily_transaction_count: u32,
    pub max_offline_transaction_count: u32,
    pub status: WalletStatus,
    pub pending_count: u32,
    pub sync_deadline: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl WalletProjection {
    /// Builds a fresh projection from a remote record with no queued debits.
    #[must_use]
    pub fn from_remote(remote: &RemoteWallet, fetched_at: DateTime<Utc>) -> Self {
        Self {
            wallet_id: remote.wallet_id.clone(),
            user_id: remote.user_id.clone(),
            address: remote.address.clone(),
            server_balance: remote.balance,
            local_balance: remote.balance,
            max_balance: remote.max_balance,
            max_transaction_amount: remote.max_transaction_amount,
            max_daily_transaction_count: remote.max_daily_transaction_count,
            max_offline_transaction_count: remote.max_offline_transaction_count,
            status: remote.status,
            pending_count: 0,
            sync_deadline: None,
            last_sync_at: Some(fetched_at),
        }
    }

    /// Overwrites identity, limits, and status with the remote record.
    ///
    /// Balance fields are left to [`rebase`](Self::rebase).
    pub fn apply_remote_limits(&mut self, remote: &RemoteWallet) {
        self.user_id = remote.user_id.clone();
        self.address = remote.address.clone();
        self.max_balance = remote.max_balance;
        self.max_transaction_amount = remote.max_transaction_amount;
        self.max_daily_transaction_count = remote.max_daily_transaction_count;
        self.max_offline_transaction_count = remote.max_offline_transaction_count;
        self.status = remote.status;
    }

    /// Re-derives the projection from an authoritative balance and the
    /// wallet's outstanding local debits.
    ///
    /// Idempotent: calling it twice with the same inputs changes nothing.
    pub fn rebase(&mut self, server_balance: Money, outstanding: Money, pending_count: u32) {
        self.server_balance = server_balance;
        self.local_balance = server_balance - outstanding;
        self.pending_count = pending_count;
        if pending_count == 0 {
            self.sync_deadline = None;
        }
    }

    /// Holds back `amount` for a newly queued debit.
    ///
    /// The first queued debit after a clean state starts the sync deadline;
    /// later ones leave it where it is.
    pub fn reserve(&mut self, amount: Money, deadline: DateTime<Utc>) {
        if self.pending_count == 0 || self.sync_deadline.is_none() {
            self.sync_deadline = Some(deadline);
        }
        self.local_balance -= amount;
        self.pending_count += 1;
    }

    /// A queued debit will never land: credit it back.
    pub fn release(&mut self, amount: Money) {
        self.local_balance += amount;
        self.dequeue();
    }

    /// A queued debit landed on the remote ledger.
    ///
    /// `local_balance` already reflected it; the known server balance
    /// catches up until the next authoritative fetch.
    pub fn settle(&mut self, amount: Money) {
        self.server_balance -= amount;
        self.dequeue();
    }

    fn dequeue(&mut self) {
        self.pending_count = self.pending_count.saturating_sub(1);
        if self.pending_count == 0 {
            self.sync_deadline = None;
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == WalletStatus::Active
    }
}
