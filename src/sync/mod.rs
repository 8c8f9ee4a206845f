//! Reconciliation with the remote ledger.
//!
//! The [`reconciler`] drives each wallet's local queue to the remote side
//! and re-bases the wallet projection on the authoritative balance. The
//! remote itself sits behind the [`RemoteLedger`] trait; [`http`] is the
//! production implementation and [`crate::simulation`] an in-process one.
//! [`driver`] runs passes in the background whenever the [`connectivity`]
//! signal reports the network as reachable.

pub mod connectivity;
pub mod driver;
pub mod http;
pub mod reconciler;
pub mod remote;

pub use connectivity::{Connectivity, ConnectivityWatch};
pub use driver::SyncDriver;
pub use reconciler::{SyncReport, TransactionFailure, reconcile_wallet};
pub use remote::{RemoteLedger, SubmitOutcome, SubmitRequest};

use crate::models::WalletId;

/// The remote ledger could not answer a wallet fetch.
///
/// Submit failures are never errors: they are [`SubmitOutcome`]s.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("wallet {0} not found on remote ledger")]
    NotFound(WalletId),

    #[error("remote ledger unreachable: {0}")]
    Unreachable(String),

    #[error("remote ledger did not answer in time")]
    Timeout,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed remote response: {0}")]
    Malformed(String),

    #[error("request signing failed: {0}")]
    Auth(String),
}

impl RemoteError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "remote_not_found",
            Self::Unreachable(_) => "remote_unreachable",
            Self::Timeout => "remote_timeout",
            Self::Http(_) => "remote_http",
            Self::Malformed(_) => "remote_malformed",
            Self::Auth(_) => "remote_auth",
        }
    }
}
