//! In-memory ledger state and its indexes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::{DailyCounter, Money, Transaction, TransactionId, WalletId, WalletProjection};

/// A single record mutation. A unit of work commits a list of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "record", rename_all = "snake_case")]
pub enum Write {
    PutWallet(WalletProjection),
    PutTransaction(Transaction),
    PutCounter(DailyCounter),
    DeleteTransaction(TransactionId),
}

/// FIFO key: admission sequence, unique per store.
type QueueKey = (u64, TransactionId);

/// Committed ledger contents.
///
/// Transactions are indexed by wallet (in admission order) and by reference
/// id. Only [`apply`](Self::apply) mutates it.
#[derive(Debug, Clone, Default)]
pub struct LedgerState {
    wallets: BTreeMap<WalletId, WalletProjection>,
    transactions: HashMap<TransactionId, Transaction>,
    by_wallet: HashMap<WalletId, BTreeSet<QueueKey>>,
    by_reference: HashMap<String, TransactionId>,
    counters: BTreeMap<(WalletId, NaiveDate), DailyCounter>,
    last_admission_seq: u64,
}

/// On-disk form of [`LedgerState`].
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    pub seq: u64,
    pub wallets: Vec<WalletProjection>,
    pub transactions: Vec<Transaction>,
    pub counters: Vec<DailyCounter>,
}

impl LedgerState {
    #[must_use]
    pub fn wallet(&self, id: &WalletId) -> Option<&WalletProjection> {
        self.wallets.get(id)
    }

    pub fn wallets(&self) -> impl Iterator<Item = &WalletProjection> {
        self.wallets.values()
    }

    #[must_use]
    pub fn transaction(&self, id: &TransactionId) -> Option<&Transaction> {
        self.transactions.get(id)
    }

    #[must_use]
    pub fn transaction_by_reference(&self, reference_id: &str) -> Option<&Transaction> {
        self.by_reference
            .get(reference_id)
            .and_then(|id| self.transactions.get(id))
    }

    /// All of a wallet's transactions, oldest admission first.
    pub fn wallet_transactions<'a>(
        &'a self,
        wallet_id: &WalletId,
    ) -> impl Iterator<Item = &'a Transaction> + use<'a> {
        self.by_wallet
            .get(wallet_id)
            .into_iter()
            .flat_map(|keys| keys.iter())
            .filter_map(|(_, id)| self.transactions.get(id))
    }

    /// Every transaction in the store, in no particular order.
    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.values()
    }

    #[must_use]
    pub fn counter(&self, wallet_id: &WalletId, date: NaiveDate) -> Option<&DailyCounter> {
        self.counters.get(&(wallet_id.clone(), date))
    }

    /// Highest admission sequence handed out so far.
    #[must_use]
    pub fn last_admission_seq(&self) -> u64 {
        self.last_admission_seq
    }

    /// Sum and count of the wallet's queued (`Pending`/`SyncInFlight`) debits.
    #[must_use]
    pub fn outstanding(&self, wallet_id: &WalletId) -> (Money, u32) {
        self.wallet_transactions(wallet_id)
            .filter(|tx| tx.state.is_queued())
            .fold((0, 0), |(sum, count), tx| (sum + tx.amount, count + 1))
    }

    /// Applies one write, keeping the indexes consistent.
    pub(crate) fn apply(&mut self, write: Write) {
        match write {
            Write::PutWallet(wallet) => {
                self.wallets.insert(wallet.wallet_id.clone(), wallet);
            }
            Write::PutTransaction(tx) => {
                self.unindex(&tx.id);
                self.by_wallet
                    .entry(tx.sender_wallet_id.clone())
                    .or_default()
                    .insert((tx.admission_seq, tx.id));
                self.last_admission_seq = self.last_admission_seq.max(tx.admission_seq);
                self.by_reference.insert(tx.reference_id.clone(), tx.id);
                self.transactions.insert(tx.id, tx);
            }
            Write::PutCounter(counter) => {
                self.counters
                    .insert((counter.wallet_id.clone(), counter.date), counter);
            }
            Write::DeleteTransaction(id) => {
                self.unindex(&id);
                self.transactions.remove(&id);
            }
        }
    }

    fn unindex(&mut self, id: &TransactionId) {
        let Some(existing) = self.transactions.get(id) else {
            return;
        };
        if let Some(keys) = self.by_wallet.get_mut(&existing.sender_wallet_id) {
            keys.remove(&(existing.admission_seq, existing.id));
            if keys.is_empty() {
                self.by_wallet.remove(&existing.sender_wallet_id);
            }
        }
        self.by_reference.remove(&existing.reference_id);
    }

    pub(crate) fn to_snapshot(&self, seq: u64) -> Snapshot {
        let mut transactions: Vec<Transaction> = self.transactions.values().cloned().collect();
        transactions.sort_by_key(|tx| (tx.admission_seq, tx.id));
        Snapshot {
            seq,
            wallets: self.wallets.values().cloned().collect(),
            transactions,
            counters: self.counters.values().cloned().collect(),
        }
    }

    pub(crate) fn from_snapshot(snapshot: Snapshot) -> (Self, u64) {
        let mut state = Self::default();
        for wallet in snapshot.wallets {
            state.apply(Write::PutWallet(wallet));
        }
        for tx in snapshot.transactions {
            state.apply(Write::PutTransaction(tx));
        }
        for counter in snapshot.counters {
            state.apply(Write::PutCounter(counter));
        }
        (state, snapshot.seq)
    }
}
