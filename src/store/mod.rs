//! Local ledger store.
//!
//! Durable storage for wallet projections, transactions, and daily counters
//! with one write primitive, [`LedgerStore::unit_of_work`]: the caller reads
//! and stages writes against a consistent view, and either every staged
//! write commits or none does. Units of work are serialized, so no caller
//! ever observes another unit's intermediate state.
//!
//! A commit is appended to the write-ahead [`journal`] and fsynced before
//! the in-memory state changes; a failed append leaves both untouched.

mod journal;
pub mod state;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::models::{DailyCounter, Money, Transaction, TransactionId, WalletId, WalletProjection};
use journal::{Journal, JournalEntry};
pub use state::{LedgerState, Write};

/// Failure of the local store. The attempted operation had no effect.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("failed to persist snapshot: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("corrupt ledger data: {0}")]
    Corrupt(String),

    /// A journal write failed and could not be rolled back; the store
    /// refuses further writes until reopened.
    #[error("store is poisoned after an unrecoverable journal failure")]
    Poisoned,
}

/// Fault injected into the next commit.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    /// The commit fails before anything reaches the journal.
    FailBeforeAppend,
    /// Half the entry reaches disk and the process "dies".
    TornAppend,
}

struct Inner {
    state: LedgerState,
    journal: Option<Journal>,
    seq: u64,
    since_compaction: usize,
    compact_every: usize,
    poisoned: bool,
    #[cfg(test)]
    fault: Option<Fault>,
}

/// Durable, crash-safe ledger storage.
pub struct LedgerStore {
    inner: Mutex<Inner>,
}

impl LedgerStore {
    /// Opens (or creates) a store in `dir`, recovering from its journal.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the directory cannot be read or the
    /// snapshot is corrupt.
    pub fn open(dir: &Path, compact_every: usize) -> Result<Self, StorageError> {
        let recovered = Journal::open(dir)?;
        Ok(Self::from_inner(Inner {
            state: recovered.state,
            journal: Some(recovered.journal),
            seq: recovered.seq,
            since_compaction: recovered.replayed,
            compact_every: compact_every.max(1),
            poisoned: false,
            #[cfg(test)]
            fault: None,
        }))
    }

    /// A store without durability, for simulations and tests.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_inner(Inner {
            state: LedgerState::default(),
            journal: None,
            seq: 0,
            since_compaction: 0,
            compact_every: usize::MAX,
            poisoned: false,
            #[cfg(test)]
            fault: None,
        })
    }

    fn from_inner(inner: Inner) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::Poisoned)
    }

    /// Runs `f` against a consistent read view of the committed state.
    pub fn read<T>(&self, f: impl FnOnce(&LedgerState) -> T) -> Result<T, StorageError> {
        let inner = self.lock()?;
        Ok(f(&inner.state))
    }

    /// Runs one atomic unit of work.
    ///
    /// `f` reads through the [`UnitOfWork`] (which sees its own staged
    /// writes) and stages writes on it. If `f` returns `Ok`, all staged
    /// writes commit together; if it returns `Err` or the commit fails,
    /// nothing changes.
    pub fn unit_of_work<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut UnitOfWork<'_>) -> Result<T, E>,
        E: From<StorageError>,
    {
        let mut inner = self.lock()?;
        if inner.poisoned {
            return Err(StorageError::Poisoned.into());
        }

        let mut unit = UnitOfWork::new(&inner.state);
        let value = f(&mut unit)?;
        let writes = unit.into_writes();
        if writes.is_empty() {
            return Ok(value);
        }

        inner.commit(writes)?;
        Ok(value)
    }

    /// Last committed sequence number.
    pub fn seq(&self) -> Result<u64, StorageError> {
        Ok(self.lock()?.seq)
    }

    /// Forces a snapshot and empties the journal.
    pub fn compact(&self) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        let Inner {
            state,
            journal,
            seq,
            since_compaction,
            ..
        } = &mut *inner;
        if let Some(journal) = journal {
            journal.compact(state, *seq)?;
            *since_compaction = 0;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn inject_fault(&self, fault: Fault) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fault = Some(fault);
        }
    }
}

impl Inner {
    #[cfg(test)]
    fn check_fault(&mut self, entry: &JournalEntry) -> Result<(), StorageError> {
        match self.fault.take() {
            None => Ok(()),
            Some(Fault::FailBeforeAppend) => {
                Err(std::io::Error::other("injected fault before append").into())
            }
            Some(Fault::TornAppend) => {
                if let Some(journal) = self.journal.as_mut() {
                    journal.append_torn(entry)?;
                }
                self.poisoned = true;
                Err(StorageError::Poisoned)
            }
        }
    }

    #[cfg(not(test))]
    fn check_fault(&mut self, _entry: &JournalEntry) -> Result<(), StorageError> {
        Ok(())
    }

    fn commit(&mut self, writes: Vec<Write>) -> Result<(), StorageError> {
        let entry = JournalEntry {
            seq: self.seq + 1,
            writes,
        };

        self.check_fault(&entry)?;

        if let Some(journal) = self.journal.as_mut() {
            if let Err(e) = journal.append(&entry) {
                if matches!(e, StorageError::Poisoned) {
                    self.poisoned = true;
                }
                warn!(seq = entry.seq, error = %e, "journal append failed");
                return Err(e);
            }
        }

        self.seq = entry.seq;
        for write in entry.writes {
            self.state.apply(write);
        }
        self.since_compaction += 1;

        if self.since_compaction >= self.compact_every
            && let Some(journal) = self.journal.as_mut()
        {
            // The journal already holds this entry, so a failed snapshot
            // loses nothing.
            match journal.compact(&self.state, self.seq) {
                Ok(()) => self.since_compaction = 0,
                Err(e) => warn!(error = %e, "snapshot compaction failed"),
            }
        }

        debug!(seq = self.seq, "unit of work committed");
        Ok(())
    }
}

/// Staging area for one atomic unit of work.
///
/// Reads see the committed state overlaid with this unit's own writes.
pub struct UnitOfWork<'a> {
    base: &'a LedgerState,
    wallets: HashMap<WalletId, WalletProjection>,
    transactions: HashMap<TransactionId, Option<Transaction>>,
    counters: HashMap<(WalletId, NaiveDate), DailyCounter>,
    admissions: u64,
    writes: Vec<Write>,
}

impl<'a> UnitOfWork<'a> {
    fn new(base: &'a LedgerState) -> Self {
        Self {
            base,
            wallets: HashMap::new(),
            transactions: HashMap::new(),
            counters: HashMap::new(),
            admissions: 0,
            writes: Vec::new(),
        }
    }

    fn into_writes(self) -> Vec<Write> {
        self.writes
    }

    #[must_use]
    pub fn wallet(&self, id: &WalletId) -> Option<WalletProjection> {
        self.wallets
            .get(id)
            .or_else(|| self.base.wallet(id))
            .cloned()
    }

    /// Ids of every wallet visible to this unit.
    #[must_use]
    pub fn wallet_ids(&self) -> Vec<WalletId> {
        let mut ids: Vec<WalletId> = self
            .base
            .wallets()
            .map(|w| w.wallet_id.clone())
            .chain(self.wallets.keys().cloned())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn put_wallet(&mut self, wallet: WalletProjection) {
        self.wallets.insert(wallet.wallet_id.clone(), wallet.clone());
        self.writes.push(Write::PutWallet(wallet));
    }

    #[must_use]
    pub fn transaction(&self, id: &TransactionId) -> Option<Transaction> {
        match self.transactions.get(id) {
            Some(staged) => staged.clone(),
            None => self.base.transaction(id).cloned(),
        }
    }

    #[must_use]
    pub fn transaction_by_reference(&self, reference_id: &str) -> Option<Transaction> {
        let staged = self
            .transactions
            .values()
            .flatten()
            .find(|tx| tx.reference_id == reference_id);
        if let Some(tx) = staged {
            return Some(tx.clone());
        }
        self.base
            .transaction_by_reference(reference_id)
            .and_then(|tx| self.transaction(&tx.id))
    }

    /// Allocates the admission sequence for a new transaction.
    ///
    /// Sequences increase across units of work, so submission order never
    /// depends on clock readings.
    pub fn next_admission_seq(&mut self) -> u64 {
        self.admissions += 1;
        self.base.last_admission_seq() + self.admissions
    }

    pub fn put_transaction(&mut self, tx: Transaction) {
        self.transactions.insert(tx.id, Some(tx.clone()));
        self.writes.push(Write::PutTransaction(tx));
    }

    pub fn delete_transaction(&mut self, id: TransactionId) {
        self.transactions.insert(id, None);
        self.writes.push(Write::DeleteTransaction(id));
    }

    /// The wallet's transactions, oldest admission first.
    #[must_use]
    pub fn wallet_transactions(&self, wallet_id: &WalletId) -> Vec<Transaction> {
        let mut ordered: BTreeMap<(u64, TransactionId), Transaction> = BTreeMap::new();
        for tx in self.base.wallet_transactions(wallet_id) {
            if let Some(current) = self.transaction(&tx.id) {
                ordered.insert((current.admission_seq, current.id), current);
            }
        }
        for tx in self.transactions.values().flatten() {
            if &tx.sender_wallet_id == wallet_id {
                ordered.insert((tx.admission_seq, tx.id), tx.clone());
            }
        }
        ordered.into_values().collect()
    }

    /// Sum and count of the wallet's queued debits, including staged ones.
    #[must_use]
    pub fn outstanding(&self, wallet_id: &WalletId) -> (Money, u32) {
        self.wallet_transactions(wallet_id)
            .iter()
            .filter(|tx| tx.state.is_queued())
            .fold((0, 0), |(sum, count), tx| (sum + tx.amount, count + 1))
    }

    /// The wallet's counter for `date`, or an empty one.
    #[must_use]
    pub fn counter(&self, wallet_id: &WalletId, date: NaiveDate) -> DailyCounter {
        let key = (wallet_id.clone(), date);
        self.counters
            .get(&key)
            .or_else(|| self.base.counter(wallet_id, date))
            .cloned()
            .unwrap_or_else(|| DailyCounter::empty(wallet_id.clone(), date))
    }

    pub fn put_counter(&mut self, counter: DailyCounter) {
        self.counters
            .insert((counter.wallet_id.clone(), counter.date), counter.clone());
        self.writes.push(Write::PutCounter(counter));
    }
}
