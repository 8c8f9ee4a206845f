//! Deadline and status derivation.
//!
//! Read-side only: everything here is computed from a wallet projection,
//! today's counter, and the current time. Nothing is mutated.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{DailyCounter, Money, WalletProjection, WalletStatus};

/// Snapshot of a wallet's offline state for presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletStatusReport {
    pub local_balance: Money,
    pub server_balance: Money,
    pub pending_count: u32,
    pub needs_sync: bool,
    pub deadline_exceeded: bool,
    /// Whole hours left before the sync deadline; `0` once passed and
    /// `None` when no deadline is set.
    pub hours_until_deadline: Option<i64>,
    pub sync_deadline: Option<DateTime<Utc>>,
    pub status: WalletStatus,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub remaining_daily_transactions: u32,
    pub remaining_offline_transactions: u32,
    /// Largest amount the policy would currently admit, ignoring counters.
    pub max_spendable: Money,
}

/// Returns `true` if a deadline is set and `now` is past it.
#[must_use]
pub fn deadline_exceeded(deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    deadline.is_some_and(|d| now > d)
}

/// Whole hours until the deadline, clamped at zero.
#[must_use]
pub fn hours_until_deadline(deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<i64> {
    deadline.map(|d| (d - now).num_hours().max(0))
}

/// Derives the status report for a wallet.
///
/// `today` is the wallet's counter for the current calendar day (an empty
/// counter if nothing was admitted today).
#[must_use]
pub fn derive_status(
    wallet: &WalletProjection,
    today: &DailyCounter,
    now: DateTime<Utc>,
) -> WalletStatusReport {
    let exceeded = deadline_exceeded(wallet.sync_deadline, now);
    let blocked = exceeded || wallet.status != WalletStatus::Active;
    let max_spendable = if blocked {
        0
    } else {
        wallet
            .local_balance
            .min(wallet.max_transaction_amount)
            .max(0)
    };

    WalletStatusReport {
        local_balance: wallet.local_balance,
        server_balance: wallet.server_balance,
        pending_count: wallet.pending_count,
        needs_sync: wallet.pending_count > 0,
        deadline_exceeded: exceeded,
        hours_until_deadline: hours_until_deadline(wallet.sync_deadline, now),
        sync_deadline: wallet.sync_deadline,
        status: wallet.status,
        last_sync_at: wallet.last_sync_at,
        remaining_daily_transactions: wallet
            .max_daily_transaction_count
            .saturating_sub(today.transaction_count),
        remaining_offline_transactions: wallet
            .max_offline_transaction_count
            .saturating_sub(today.offline_transaction_count),
        max_spendable,
    }
}
