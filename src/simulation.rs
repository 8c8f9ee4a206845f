//! In-process remote ledger for demo mode and tests.
//!
//! [`SimulatedLedger`] keeps authoritative wallet balances in memory and
//! answers fetches and submits the way the real backend does, including
//! deduplication on the reference id. Failures can be scripted one submit
//! at a time, so tests can reproduce timeouts, lost responses and policy
//! rejections deterministically. Clones share the same state.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::models::{Money, RemoteWallet, WalletId, WalletStatus};
use crate::sync::{RemoteError, RemoteLedger, SubmitOutcome, SubmitRequest};

/// Behaviour forced onto the next submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedSubmit {
    /// Never answers; the caller's timeout fires.
    Hang,
    /// Answers with a transport failure without applying anything.
    Unreachable,
    /// Applies the submit but the answer is lost in transit.
    ApplyThenDrop,
    /// Refuses with the given reason.
    Reject(String),
}

#[derive(Debug, Default)]
struct SimState {
    wallets: HashMap<WalletId, RemoteWallet>,
    /// Reference id -> remote id of every applied submit.
    applied: HashMap<String, String>,
    script: VecDeque<ScriptedSubmit>,
    unreachable: bool,
    next_remote_id: u64,
    submit_calls: usize,
}

/// Simulated remote ledger with idempotent submits.
#[derive(Debug, Clone, Default)]
pub struct SimulatedLedger {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`add_wallet`](Self::add_wallet).
    #[must_use]
    pub fn with_wallet(self, wallet: RemoteWallet) -> Self {
        self.add_wallet(wallet);
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds or replaces a wallet record.
    pub fn add_wallet(&self, wallet: RemoteWallet) {
        self.lock().wallets.insert(wallet.wallet_id.clone(), wallet);
    }

    /// Simulates losing (or regaining) the network entirely.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Queues a scripted behaviour for an upcoming submit.
    pub fn script(&self, behaviour: ScriptedSubmit) {
        self.lock().script.push_back(behaviour);
    }

    pub fn set_status(&self, wallet_id: &WalletId, status: WalletStatus) {
        if let Some(wallet) = self.lock().wallets.get_mut(wallet_id) {
            wallet.status = status;
        }
    }

    /// Credits a wallet outside of any submit, as a top-up on another
    /// device would.
    pub fn credit(&self, wallet_id: &WalletId, amount: Money) {
        if let Some(wallet) = self.lock().wallets.get_mut(wallet_id) {
            wallet.balance += amount;
        }
    }

    #[must_use]
    pub fn balance(&self, wallet_id: &WalletId) -> Option<Money> {
        self.lock().wallets.get(wallet_id).map(|w| w.balance)
    }

    /// Whether a submit with this reference id has been applied.
    #[must_use]
    pub fn is_applied(&self, reference_id: &str) -> bool {
        self.lock().applied.contains_key(reference_id)
    }

    /// Number of distinct submits that moved funds.
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.lock().applied.len()
    }

    /// Number of submit calls received, including failed and duplicate ones.
    #[must_use]
    pub fn submit_calls(&self) -> usize {
        self.lock().submit_calls
    }

    /// Applies a submit against the simulated balances.
    fn apply(state: &mut SimState, request: &SubmitRequest) -> SubmitOutcome {
        if let Some(remote_id) = state.applied.get(&request.reference_id) {
            return SubmitOutcome::RejectedDuplicate {
                remote_id: remote_id.clone(),
            };
        }

        let Some(sender) = state.wallets.get_mut(&request.sender_wallet_id) else {
            return SubmitOutcome::RejectedPolicy {
                reason: format!("unknown wallet {}", request.sender_wallet_id),
            };
        };
        if sender.status != WalletStatus::Active {
            return SubmitOutcome::RejectedPolicy {
                reason: format!("wallet is {}", sender.status.as_str()),
            };
        }
        if request.amount > sender.max_transaction_amount {
            return SubmitOutcome::RejectedPolicy {
                reason: "amount exceeds per-transaction limit".to_string(),
            };
        }
        if request.amount > sender.balance {
            return SubmitOutcome::RejectedPolicy {
                reason: "insufficient balance".to_string(),
            };
        }
        sender.balance -= request.amount;

        if let Some(receiver_id) = &request.receiver_wallet_id
            && let Some(receiver) = state.wallets.get_mut(receiver_id)
        {
            receiver.balance += request.amount;
        }

        state.next_remote_id += 1;
        let remote_id = format!("SIM{:08}", state.next_remote_id);
        state
            .applied
            .insert(request.reference_id.clone(), remote_id.clone());
        SubmitOutcome::Accepted { remote_id }
    }
}

impl RemoteLedger for SimulatedLedger {
    async fn fetch_wallet(&self, wallet_id: &WalletId) -> Result<RemoteWallet, RemoteError> {
        let state = self.lock();
        if state.unreachable {
            return Err(RemoteError::Unreachable("simulated network down".to_string()));
        }
        state
            .wallets
            .get(wallet_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(wallet_id.clone()))
    }

    async fn submit(&self, request: &SubmitRequest) -> SubmitOutcome {
        let outcome = {
            let mut state = self.lock();
            state.submit_calls += 1;
            if state.unreachable {
                Err(ScriptedSubmit::Unreachable)
            } else {
                match state.script.pop_front() {
                    None => Ok(Self::apply(&mut state, request)),
                    Some(ScriptedSubmit::ApplyThenDrop) => {
                        let _ = Self::apply(&mut state, request);
                        Err(ScriptedSubmit::ApplyThenDrop)
                    }
                    Some(ScriptedSubmit::Reject(reason)) => {
                        Ok(SubmitOutcome::RejectedPolicy { reason })
                    }
                    Some(other) => Err(other),
                }
            }
        };

        debug!(reference_id = %request.reference_id, ?outcome, "simulated submit");
        match outcome {
            Ok(outcome) => outcome,
            Err(ScriptedSubmit::Hang) => std::future::pending().await,
            Err(_) => SubmitOutcome::Unreachable {
                message: "simulated connection reset".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TransactionKind, TransferMethod};
    use chrono::Utc;

    fn wallet(id: &str, balance: Money) -> RemoteWallet {
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

    fn request(reference: &str, amount: Money) -> SubmitRequest {
        SubmitRequest {
            reference_id: reference.to_string(),
            sender_wallet_id: WalletId::new("alice"),
            receiver_wallet_id: Some(WalletId::new("bob")),
            merchant_id: None,
            amount,
            description: None,
            kind: TransactionKind::Payment,
            method: TransferMethod::Qr,
            offline: true,
            created_offline_at: Utc::now(),
        }
    }

    fn sim() -> SimulatedLedger {
        SimulatedLedger::new()
            .with_wallet(wallet("alice", 50_000))
            .with_wallet(wallet("bob", 0))
    }

    #[tokio::test]
    async fn submit_moves_funds_once() {
        let sim = sim();
        let first = sim.submit(&request("OFF1", 10_000)).await;
        assert!(matches!(first, SubmitOutcome::Accepted { .. }));

        let second = sim.submit(&request("OFF1", 10_000)).await;
        assert!(matches!(second, SubmitOutcome::RejectedDuplicate { .. }));

        assert_eq!(sim.balance(&WalletId::new("alice")), Some(40_000));
        assert_eq!(sim.balance(&WalletId::new("bob")), Some(10_000));
        assert_eq!(sim.applied_count(), 1);
        assert_eq!(sim.submit_calls(), 2);
    }

    #[tokio::test]
    async fn lost_response_still_applies() {
        let sim = sim();
        sim.script(ScriptedSubmit::ApplyThenDrop);
        let outcome = sim.submit(&request("OFF2", 5_000)).await;
        assert!(matches!(outcome, SubmitOutcome::Unreachable { .. }));
        assert!(sim.is_applied("OFF2"));
        assert_eq!(sim.balance(&WalletId::new("alice")), Some(45_000));
    }

    #[tokio::test]
    async fn insufficient_funds_rejected() {
        let sim = sim();
        let outcome = sim.submit(&request("OFF3", 60_000)).await;
        assert!(matches!(outcome, SubmitOutcome::RejectedPolicy { .. }));
        assert_eq!(sim.balance(&WalletId::new("alice")), Some(50_000));
    }

    #[tokio::test]
    async fn frozen_wallet_rejected() {
        let sim = sim();
        sim.set_status(&WalletId::new("alice"), WalletStatus::Frozen);
        let outcome = sim.submit(&request("OFF4", 1_000)).await;
        assert_eq!(
            outcome,
            SubmitOutcome::RejectedPolicy {
                reason: "wallet is frozen".to_string()
            }
        );
    }

    #[tokio::test]
    async fn unreachable_fetch_fails() {
        let sim = sim();
        sim.set_unreachable(true);
        let err = sim.fetch_wallet(&WalletId::new("alice")).await.unwrap_err();
        assert_eq!(err.kind(), "remote_unreachable");

        sim.set_unreachable(false);
        let err = sim.fetch_wallet(&WalletId::new("carol")).await.unwrap_err();
        assert!(matches!(err, RemoteError::NotFound(_)));
    }
}
