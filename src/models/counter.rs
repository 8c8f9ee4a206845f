//! Per-(wallet, calendar day) transaction counters.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{Money, WalletId};

/// Aggregate of one wallet's admitted transactions on one calendar day.
///
/// Only ever incremented; a new row starts each day and old rows are kept
/// for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCounter {
    pub wallet_id: WalletId,
    pub date: NaiveDate,
    pub transaction_count: u32,
    pub offline_transaction_count: u32,
    pub total_amount: Money,
}

impl DailyCounter {
    /// An empty counter for the given wallet and day.
    #[must_use]
    pub fn empty(wallet_id: WalletId, date: NaiveDate) -> Self {
        Self {
            wallet_id,
            date,
            transaction_count: 0,
            offline_transaction_count: 0,
            total_amount: 0,
        }
    }

    /// Counts one admitted transaction.
    pub fn record(&mut self, amount: Money, offline: bool) {
        self.transaction_count += 1;
        if offline {
            self.offline_transaction_count += 1;
        }
        self.total_amount += amount;
    }
}
