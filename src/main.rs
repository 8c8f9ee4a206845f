use std::io::BufRead;
use std::sync::Arc;

use offpay::OffpayError;
use offpay::auth::RequestSigner;
use offpay::config::{AppConfig, fetch_config};
use offpay::credentials::{self, CredentialKey, CredentialStore, Keychain};
use offpay::ledger::OfflineLedger;
use offpay::models::{RemoteWallet, WalletStatus};
use offpay::policy::config::LedgerPolicy;
use offpay::simulation::SimulatedLedger;
use offpay::sync::http::HttpRemoteLedger;
use offpay::sync::{RemoteLedger, SyncDriver};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Opening balance of each wallet in simulation mode.
const SIMULATED_BALANCE: i64 = 500_000;

#[tokio::main]
async fn main() -> Result<(), OffpayError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if std::env::args().nth(1).as_deref() == Some("store-credentials") {
        return store_credentials();
    }

    let config = fetch_config()?;

    let policy = match &config.policy_file {
        Some(path) => LedgerPolicy::load(path)?,
        None => LedgerPolicy::default(),
    };
    info!("{}", policy.describe());

    if config.simulate {
        let sim = SimulatedLedger::new();
        for wallet_id in &config.wallets {
            sim.add_wallet(RemoteWallet {
                wallet_id: wallet_id.clone(),
                user_id: format!("user-{wallet_id}"),
                address: format!("{wallet_id}@offpay"),
                balance: SIMULATED_BALANCE,
                max_balance: 2_000_000,
                max_transaction_amount: 200_000,
                max_daily_transaction_count: 20,
                max_offline_transaction_count: 10,
                status: WalletStatus::Active,
            });
        }
        info!(wallets = config.wallets.len(), "running against simulated ledger");
        run(config, policy, sim).await
    } else {
        let remote = http_remote(&config, &policy)?;
        run(config, policy, remote).await
    }
}

fn http_remote(config: &AppConfig, policy: &LedgerPolicy) -> offpay::Result<HttpRemoteLedger> {
    let url = config
        .remote
        .url
        .as_deref()
        .ok_or_else(|| OffpayError::Config("OFFPAY_REMOTE_URL is not set".to_string()))?;

    let tls = config
        .remote
        .ca_cert
        .as_deref()
        .map(offpay::tls::build_tls_config)
        .transpose()?;

    let signer = match credentials::resolve(&config.remote, &Keychain) {
        Some(creds) => {
            info!(source = ?creds.source, "signing remote requests");
            Some(RequestSigner::from_credentials(&creds)?)
        }
        None => {
            warn!("no API credentials; remote requests are unsigned");
            None
        }
    };

    HttpRemoteLedger::new(url, tls, signer, policy.submit_timeout())
}

async fn run<R: RemoteLedger + 'static>(
    config: AppConfig,
    policy: LedgerPolicy,
    remote: R,
) -> offpay::Result<()> {
    let ledger = Arc::new(OfflineLedger::open(&config.data_dir, remote, policy)?);

    // The daemon has no platform reachability probe; a failing pass backs off.
    ledger.connectivity().set_online(true);

    for wallet_id in &config.wallets {
        match ledger.register_wallet(wallet_id).await {
            Ok(wallet) => info!(
                wallet_id = %wallet_id,
                local_balance = wallet.local_balance,
                pending = wallet.pending_count,
                "wallet registered"
            ),
            Err(e) => warn!(wallet_id = %wallet_id, kind = e.kind(), "registration failed: {e}"),
        }
    }

    let handle = SyncDriver::new(ledger.clone(), config.sync_interval)
        .with_wallets(config.wallets.clone())
        .spawn();

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    handle.shutdown().await;

    match ledger.purge_settled() {
        Ok(purged) => info!(purged, "purged settled transactions"),
        Err(e) => warn!("purge failed: {e}"),
    }
    Ok(())
}

/// Reads the API key and secret from stdin (one per line) into the keychain.
fn store_credentials() -> Result<(), OffpayError> {
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    for key in CredentialKey::ALL {
        let value = lines.next().transpose()?.unwrap_or_default();
        let value = zeroize::Zeroizing::new(value.trim().to_string());
        if value.is_empty() {
            return Err(OffpayError::Config(format!(
                "missing value for {}",
                key.env_var()
            )));
        }
        Keychain.save(key, &value)?;
        info!(key = key.keyring_id(), "stored credential in keychain");
    }
    Ok(())
}
