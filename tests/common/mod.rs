//! Shared test utilities and fixtures.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use offpay::clock::ManualClock;
use offpay::ledger::OfflineLedger;
use offpay::models::{Money, RemoteWallet, WalletId, WalletStatus};
use offpay::policy::config::LedgerPolicy;
use offpay::simulation::SimulatedLedger;
use offpay::store::LedgerStore;

pub const WALLET: &str = "w-alice";
pub const MERCHANT_WALLET: &str = "w-shop";

/// Path to the JSON fixtures directory.
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

pub fn wallet_id() -> WalletId {
    WalletId::new(WALLET)
}

pub fn start_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

/// Remote wallet record with the limits used across the scenarios.
pub fn remote_wallet(id: &str, balance: Money) -> RemoteWallet {
    RemoteWallet {
        wallet_id: WalletId::new(id),
        user_id: format!("user-{id}"),
        address: format!("{id}@offpay"),
        balance,
        max_balance: 2_000_000,
        max_transaction_amount: 100_000,
        max_daily_transaction_count: 10,
        max_offline_transaction_count: 5,
        status: WalletStatus::Active,
    }
}

/// A ledger over an in-memory store, a simulated remote and a manual clock.
pub struct Harness {
    pub ledger: OfflineLedger<SimulatedLedger>,
    pub sim: SimulatedLedger,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    /// Registers [`WALLET`] with `balance` on the remote and locally.
    pub async fn new(balance: Money) -> Self {
        Self::with_policy(balance, LedgerPolicy::default()).await
    }

    pub async fn with_policy(balance: Money, policy: LedgerPolicy) -> Self {
        let sim = SimulatedLedger::new()
            .with_wallet(remote_wallet(WALLET, balance))
            .with_wallet(remote_wallet(MERCHANT_WALLET, 0));
        let clock = Arc::new(ManualClock::new(start_time()));
        let ledger = OfflineLedger::new(LedgerStore::in_memory(), sim.clone(), policy)
            .with_clock(clock.clone());
        ledger
            .register_wallet(&wallet_id())
            .await
            .expect("wallet registers");
        Self { ledger, sim, clock }
    }

    /// Sum of the amounts still queued for [`WALLET`].
    pub fn queued_total(&self) -> Money {
        self.ledger
            .transactions(&wallet_id())
            .expect("history readable")
            .iter()
            .filter(|tx| tx.state.is_queued())
            .map(|tx| tx.amount)
            .sum()
    }

    /// Asserts `local = server - queued`.
    pub fn assert_balance_invariant(&self) {
        let status = self.ledger.get_status(&wallet_id()).expect("status");
        assert_eq!(
            status.local_balance,
            status.server_balance - self.queued_total(),
            "local balance drifted from server balance minus queued debits"
        );
    }
}
