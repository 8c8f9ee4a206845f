//! Transaction records and their lifecycle state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Money, TransactionId, WalletId};

/// What kind of funds movement a transaction represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Payment,
    Receive,
    Refund,
    Topup,
}

/// How the payment was initiated on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMethod {
    Nfc,
    Qr,
    Manual,
}

/// Where a transaction was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Created on this device.
    Local,
}

/// Lifecycle state of a locally originated transaction.
///
/// ```text
/// Pending -> SyncInFlight -> Synced
///                         -> Failed
///                         -> Pending   (ambiguous failure, retry_count += 1)
/// Pending -> Failed                    (retries exhausted)
/// Pending -> Cancelled                 (user cancel)
/// Failed  -> Pending                   (user retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Pending,
    SyncInFlight,
    Synced,
    Failed,
    Cancelled,
}

impl TransactionState {
    /// Returns `true` while the debit is still speculative and counted
    /// against the offline balance.
    #[must_use]
    pub fn is_queued(self) -> bool {
        matches!(self, Self::Pending | Self::SyncInFlight)
    }

    /// Returns `true` for states that will never change without user action.
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Synced | Self::Cancelled)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use TransactionState::*;
        matches!(
            (self, next),
            (Pending, SyncInFlight)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (SyncInFlight, Synced)
                | (SyncInFlight, Failed)
                | (SyncInFlight, Pending)
                | (Failed, Pending)
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::SyncInFlight => "sync_in_flight",
            Self::Synced => "synced",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An illegal lifecycle transition was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("transaction cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub from: TransactionState,
    pub to: TransactionState,
}

/// One funds-movement record queued on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// Position in the device's admission order. Submission follows it.
    pub admission_seq: u64,
    /// Idempotency key sent to the remote ledger on every attempt.
    pub reference_id: String,
    pub sender_wallet_id: WalletId,
    pub receiver_wallet_id: Option<WalletId>,
    pub merchant_id: Option<String>,
    pub amount: Money,
    pub description: Option<String>,
    pub kind: TransactionKind,
    pub method: TransferMethod,
    pub origin: Origin,
    /// Admitted while the device had no connectivity.
    pub offline: bool,
    pub state: TransactionState,
    pub created_offline_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Correlation id assigned by the remote ledger.
    pub remote_id: Option<String>,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl Transaction {
    /// Moves the transaction to `next`, enforcing the lifecycle rules.
    pub fn transition(&mut self, next: TransactionState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Time at which the transaction reached a settled state, if it has.
    #[must_use]
    pub fn settled_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            TransactionState::Synced => self.synced_at,
            TransactionState::Cancelled => self.cancelled_at,
            _ => None,
        }
    }
}

/// Generates a reference id of the form `OFF<yyyymmddHHMMSS><8 hex>`.
///
/// Generated once at admission and reused on every submit attempt.
#[must_use]
pub fn new_reference_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "OFF{}{}",
        now.format("%Y%m%d%H%M%S"),
        suffix[..8].to_ascii_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransactionState::*;

    #[test]
    fn queued_states() {
        assert!(Pending.is_queued());
        assert!(SyncInFlight.is_queued());
        assert!(!Synced.is_queued());
        assert!(!Failed.is_queued());
        assert!(!Cancelled.is_queued());
    }

    #[test]
    fn terminal_states_reject_transitions() {
        for next in [Pending, SyncInFlight, Failed, Cancelled] {
            assert!(!Synced.can_transition_to(next));
            assert!(!Cancelled.can_transition_to(next));
        }
    }

    #[test]
    fn in_flight_cannot_be_cancelled() {
        assert!(!SyncInFlight.can_transition_to(Cancelled));
        assert!(Pending.can_transition_to(Cancelled));
    }

    #[test]
    fn failed_only_returns_to_pending() {
        assert!(Failed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(SyncInFlight));
        assert!(!Failed.can_transition_to(Synced));
    }

    #[test]
    fn reference_id_shape() {
        let now = DateTime::parse_from_rfc3339("2026-03-01T10:20:30Z")
            .unwrap()
            .with_timezone(&Utc);
        let reference = new_reference_id(now);
        assert!(reference.starts_with("OFF20260301102030"));
        assert_eq!(reference.len(), 3 + 14 + 8);
        assert_ne!(reference, new_reference_id(now));
    }

    #[test]
    fn state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SyncInFlight).unwrap(),
            "\"sync_in_flight\""
        );
    }
}
