//! Ledger data model.
//!
//! Contains the wallet projection, transaction, and daily counter records
//! plus the identifier newtypes shared between them. All monetary values
//! are integer counts of the smallest currency unit.

pub mod counter;
pub mod transaction;
pub mod wallet;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use counter::DailyCounter;
pub use transaction::{
    Origin, Transaction, TransactionKind, TransactionState, TransferMethod,
};
pub use wallet::{RemoteWallet, WalletProjection, WalletStatus};

/// Amount in the smallest currency unit (e.g. paise, cents).
///
/// Signed so that a projection re-based on a lower authoritative balance can
/// be represented without wrapping; admission never lets it go below zero.
pub type Money = i64;

/// Identifier of a wallet, as assigned by the remote ledger.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletId(String);

impl WalletId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WalletId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Locally generated transaction identifier.
///
/// Stable for the lifetime of the transaction; the remote ledger's own id is
/// kept in a separate correlation field and never replaces this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for TransactionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}
