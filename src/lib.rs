//! Offline payment ledger with sync reconciliation.
//!
//! Admits payments against a local wallet projection while the device is
//! offline, keeps them in a durable queue, and reconciles the queue against
//! the remote ledger once connectivity returns. [`ledger::OfflineLedger`] is
//! the entry point.

pub mod admission;
pub mod auth;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod error;
pub mod ledger;
pub mod models;
pub mod monitor;
pub mod policy;
pub mod simulation;
pub mod store;
pub mod sync;
pub mod tls;

pub use error::{OffpayError, Result};
