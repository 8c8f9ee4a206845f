//! Remote ledger interface.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RemoteError;
use crate::models::{Money, RemoteWallet, Transaction, TransactionKind, TransferMethod, WalletId};

/// Body of a transaction submit. `reference_id` is the idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub reference_id: String,
    pub sender_wallet_id: WalletId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_wallet_id: Option<WalletId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_id: Option<String>,
    pub amount: Money,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub kind: TransactionKind,
    pub method: TransferMethod,
    pub offline: bool,
    pub created_offline_at: DateTime<Utc>,
}

impl From<&Transaction> for SubmitRequest {
    fn from(tx: &Transaction) -> Self {
        Self {
            reference_id: tx.reference_id.clone(),
            sender_wallet_id: tx.sender_wallet_id.clone(),
            receiver_wallet_id: tx.receiver_wallet_id.clone(),
            merchant_id: tx.merchant_id.clone(),
            amount: tx.amount,
            description: tx.description.clone(),
            kind: tx.kind,
            method: tx.method,
            offline: tx.offline,
            created_offline_at: tx.created_offline_at,
        }
    }
}

/// What the remote ledger said about one submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Applied now.
    Accepted { remote_id: String },
    /// Already applied by an earlier attempt with the same reference id.
    RejectedDuplicate { remote_id: String },
    /// Refused; the funds did not move and never will for this attempt.
    RejectedPolicy { reason: String },
    /// No definite answer. The submit may or may not have landed.
    Unreachable { message: String },
}

impl SubmitOutcome {
    /// The funds moved on the remote side.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Accepted { .. } | Self::RejectedDuplicate { .. })
    }
}

/// The authoritative ledger the device reconciles against.
pub trait RemoteLedger: Send + Sync {
    /// Fetches the authoritative wallet record.
    fn fetch_wallet(
        &self,
        wallet_id: &WalletId,
    ) -> impl Future<Output = Result<RemoteWallet, RemoteError>> + Send;

    /// Submits one transaction. Implementations must deduplicate on
    /// `request.reference_id`.
    fn submit(&self, request: &SubmitRequest) -> impl Future<Output = SubmitOutcome> + Send;
}

impl<R: RemoteLedger> RemoteLedger for Arc<R> {
    fn fetch_wallet(
        &self,
        wallet_id: &WalletId,
    ) -> impl Future<Output = Result<RemoteWallet, RemoteError>> + Send {
        (**self).fetch_wallet(wallet_id)
    }

    fn submit(&self, request: &SubmitRequest) -> impl Future<Output = SubmitOutcome> + Send {
        (**self).submit(request)
    }
}
