//! Crate-level error types.
//!
//! [`OffpayError`] unifies every error source (configuration, storage,
//! remote ledger, JSON, I/O) behind a single enum so callers can match on
//! the variant they care about while still using `?` for propagation.
//! Each variant maps to a stable machine-readable [`kind`](OffpayError::kind).

use crate::admission::{AdmitError, CancelError, RetryError};
use crate::models::WalletId;
use crate::store::StorageError;
use crate::sync::RemoteError;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, OffpayError>;

/// Top-level error type returned by all public APIs.
#[derive(Debug, thiserror::Error)]
pub enum OffpayError {
    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// The local ledger store failed; the attempted operation left no trace.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The remote ledger could not be reached or answered unexpectedly.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// TLS configuration could not be built.
    #[error("tls error: {0}")]
    Tls(String),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem access failed outside the ledger store.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Admit(#[from] AdmitError),

    #[error(transparent)]
    Cancel(#[from] CancelError),

    #[error(transparent)]
    Retry(#[from] RetryError),

    /// The wallet has no local projection; register it first.
    #[error("unknown wallet {0}")]
    UnknownWallet(WalletId),

    /// Another sync pass for this wallet is already running.
    #[error("sync already in progress for wallet {0}")]
    SyncInProgress(WalletId),
}

impl OffpayError {
    /// Stable machine-readable error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Storage(_) => "storage",
            Self::Remote(e) => e.kind(),
            Self::Tls(_) => "tls",
            Self::Json(_) => "json",
            Self::Io(_) => "io",
            Self::Admit(e) => e.kind(),
            Self::Cancel(e) => e.kind(),
            Self::Retry(e) => e.kind(),
            Self::UnknownWallet(_) => "unknown_wallet",
            Self::SyncInProgress(_) => "sync_in_progress",
        }
    }
}
