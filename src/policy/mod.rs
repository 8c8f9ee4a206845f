//! Amount and limit policy for offline admission.
//!
//! Pure checks run against one consistent snapshot of a wallet projection
//! and its daily counter. Checks run in a fixed order and the first failure
//! is returned, so concurrent callers looking at the same state always get
//! the same answer.

pub mod config;

use std::fmt;

use chrono::{DateTime, Utc};

use crate::models::{DailyCounter, Money, WalletProjection, WalletStatus};
use crate::monitor;

/// Reason a proposed transaction was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    InvalidAmount {
        amount: Money,
    },
    ExceedsPerTransactionLimit {
        amount: Money,
        max: Money,
    },
    InsufficientBalance {
        amount: Money,
        available: Money,
    },
    DailyLimitExceeded {
        count: u32,
        max: u32,
    },
    OfflineLimitExceeded {
        count: u32,
        max: u32,
    },
    WalletNotActive {
        status: WalletStatus,
    },
    SyncDeadlineExceeded {
        deadline: DateTime<Utc>,
    },
}

impl RejectionReason {
    /// Stable machine-readable kind for presentation code.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidAmount { .. } => "invalid_amount",
            Self::ExceedsPerTransactionLimit { .. } => "exceeds_per_transaction_limit",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::DailyLimitExceeded { .. } => "daily_limit_exceeded",
            Self::OfflineLimitExceeded { .. } => "offline_limit_exceeded",
            Self::WalletNotActive { .. } => "wallet_not_active",
            Self::SyncDeadlineExceeded { .. } => "sync_deadline_exceeded",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAmount { amount } => {
                write!(f, "amount must be positive, got {amount}")
            }
            Self::ExceedsPerTransactionLimit { amount, max } => {
                write!(f, "amount {amount} exceeds per-transaction limit of {max}")
            }
            Self::InsufficientBalance { amount, available } => {
                write!(
                    f,
                    "amount {amount} exceeds available offline balance {available}"
                )
            }
            Self::DailyLimitExceeded { count, max } => {
                write!(f, "{count} transactions today reaches daily limit of {max}")
            }
            Self::OfflineLimitExceeded { count, max } => {
                write!(
                    f,
                    "{count} offline transactions today reaches offline limit of {max}"
                )
            }
            Self::WalletNotActive { status } => {
                write!(f, "wallet is {}", status.as_str())
            }
            Self::SyncDeadlineExceeded { deadline } => {
                write!(
                    f,
                    "sync deadline {} has passed; connect to sync before paying",
                    deadline.to_rfc3339()
                )
            }
        }
    }
}

impl std::error::Error for RejectionReason {}

/// Validates a proposed transaction against the wallet's limits.
///
/// `counter` must be the wallet's counter for the calendar day of `now`.
pub fn check_admission(
    wallet: &WalletProjection,
    counter: &DailyCounter,
    amount: Money,
    offline: bool,
    now: DateTime<Utc>,
) -> Result<(), RejectionReason> {
    // 1. Positive amount
    if amount <= 0 {
        return Err(RejectionReason::InvalidAmount { amount });
    }

    // 2. Per-transaction limit
    if amount > wallet.max_transaction_amount {
        return Err(RejectionReason::ExceedsPerTransactionLimit {
            amount,
            max: wallet.max_transaction_amount,
        });
    }

    // 3. Offline balance
    if amount > wallet.local_balance {
        return Err(RejectionReason::InsufficientBalance {
            amount,
            available: wallet.local_balance,
        });
    }

    // 4. Daily count
    if counter.transaction_count >= wallet.max_daily_transaction_count {
        return Err(RejectionReason::DailyLimitExceeded {
            count: counter.transaction_count,
            max: wallet.max_daily_transaction_count,
        });
    }

    // 5. Offline count
    if offline && counter.offline_transaction_count >= wallet.max_offline_transaction_count {
        return Err(RejectionReason::OfflineLimitExceeded {
            count: counter.offline_transaction_count,
            max: wallet.max_offline_transaction_count,
        });
    }

    check_wallet_open(wallet, now)
}

/// Checks applied when a failed transaction is re-queued by the user.
///
/// Daily counters are not consulted: the transaction was already counted
/// when first admitted.
pub fn check_requeue(
    wallet: &WalletProjection,
    amount: Money,
    now: DateTime<Utc>,
) -> Result<(), RejectionReason> {
    if amount > wallet.local_balance {
        return Err(RejectionReason::InsufficientBalance {
            amount,
            available: wallet.local_balance,
        });
    }
    check_wallet_open(wallet, now)
}

/// Wallet status and sync deadline, the checks that block everything.
fn check_wallet_open(wallet: &WalletProjection, now: DateTime<Utc>) -> Result<(), RejectionReason> {
    if wallet.status != WalletStatus::Active {
        return Err(RejectionReason::WalletNotActive {
            status: wallet.status,
        });
    }

    if let Some(deadline) = wallet.sync_deadline
        && monitor::deadline_exceeded(Some(deadline), now)
    {
        return Err(RejectionReason::SyncDeadlineExceeded { deadline });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WalletId;
    use chrono::{Duration, NaiveDate};

    fn wallet() -> WalletProjection {
        WalletProjection {
            wallet_id: WalletId::new("w1"),
            user_id: "u1".to_string(),
            address: "alice@offpay".to_string(),
            server_balance: 500_000,
            local_balance: 500_000,
            max_balance: 2_000_000,
            max_transaction_amount: 100_000,
            max_daily_transaction_count: 3,
            max_offline_transaction_count: 2,
            status: WalletStatus::Active,
            pending_count: 0,
            sync_deadline: None,
            last_sync_at: None,
        }
    }

    fn counter() -> DailyCounter {
        DailyCounter::empty(
            WalletId::new("w1"),
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        )
    }

    #[test]
    fn approve_valid_amount() {
        assert_eq!(
            check_admission(&wallet(), &counter(), 10_000, true, Utc::now()),
            Ok(())
        );
    }

    #[test]
    fn reject_zero_and_negative() {
        for amount in [0, -1] {
            let result = check_admission(&wallet(), &counter(), amount, true, Utc::now());
            assert!(matches!(
                result,
                Err(RejectionReason::InvalidAmount { .. })
            ));
        }
    }

    #[test]
    fn per_transaction_limit_boundary() {
        let now = Utc::now();
        assert_eq!(
            check_admission(&wallet(), &counter(), 100_000, true, now),
            Ok(())
        );
        assert!(matches!(
            check_admission(&wallet(), &counter(), 100_001, true, now),
            Err(RejectionReason::ExceedsPerTransactionLimit { .. })
        ));
    }

    #[test]
    fn balance_boundary() {
        let mut w = wallet();
        w.local_balance = 5_000;
        let now = Utc::now();
        assert_eq!(check_admission(&w, &counter(), 5_000, true, now), Ok(()));
        assert_eq!(
            check_admission(&w, &counter(), 5_001, true, now),
            Err(RejectionReason::InsufficientBalance {
                amount: 5_001,
                available: 5_000
            })
        );
    }

    #[test]
    fn daily_limit_reached() {
        let mut c = counter();
        c.transaction_count = 3;
        assert!(matches!(
            check_admission(&wallet(), &c, 1_000, false, Utc::now()),
            Err(RejectionReason::DailyLimitExceeded { count: 3, max: 3 })
        ));
    }

    #[test]
    fn offline_limit_only_applies_offline() {
        let mut c = counter();
        c.transaction_count = 2;
        c.offline_transaction_count = 2;
        let now = Utc::now();
        assert!(matches!(
            check_admission(&wallet(), &c, 1_000, true, now),
            Err(RejectionReason::OfflineLimitExceeded { .. })
        ));
        assert_eq!(check_admission(&wallet(), &c, 1_000, false, now), Ok(()));
    }

    #[test]
    fn inactive_wallet_rejected() {
        let mut w = wallet();
        w.status = WalletStatus::Frozen;
        assert_eq!(
            check_admission(&w, &counter(), 1_000, true, Utc::now()),
            Err(RejectionReason::WalletNotActive {
                status: WalletStatus::Frozen
            })
        );
    }

    #[test]
    fn deadline_exceeded_blocks_admission() {
        let now = Utc::now();
        let mut w = wallet();
        w.sync_deadline = Some(now - Duration::minutes(1));
        assert!(matches!(
            check_admission(&w, &counter(), 1_000, true, now),
            Err(RejectionReason::SyncDeadlineExceeded { .. })
        ));

        w.sync_deadline = Some(now + Duration::minutes(1));
        assert_eq!(check_admission(&w, &counter(), 1_000, true, now), Ok(()));
    }

    #[test]
    fn earlier_checks_take_priority() {
        let now = Utc::now();
        let mut w = wallet();
        w.status = WalletStatus::Closed;
        w.sync_deadline = Some(now - Duration::hours(1));
        assert!(matches!(
            check_admission(&w, &counter(), 200_000, true, now),
            Err(RejectionReason::ExceedsPerTransactionLimit { .. })
        ));
    }

    #[test]
    fn requeue_skips_counters_but_checks_balance() {
        let mut w = wallet();
        w.local_balance = 100;
        let now = Utc::now();
        assert!(matches!(
            check_requeue(&w, 101, now),
            Err(RejectionReason::InsufficientBalance { .. })
        ));
        assert_eq!(check_requeue(&w, 100, now), Ok(()));
    }

    #[test]
    fn display_and_kind() {
        let err = RejectionReason::ExceedsPerTransactionLimit {
            amount: 150_000,
            max: 100_000,
        };
        assert_eq!(
            err.to_string(),
            "amount 150000 exceeds per-transaction limit of 100000"
        );
        assert_eq!(err.kind(), "exceeds_per_transaction_limit");
    }
}
