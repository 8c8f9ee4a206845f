//! Application configuration loaded from environment variables.
//!
//! - `OFFPAY_DATA_DIR`: ledger store directory (default `./offpay-data`)
//! - `OFFPAY_REMOTE_URL`: base URL of the remote ledger API
//! - `OFFPAY_API_KEY` / `OFFPAY_API_SECRET`: request-signing credentials
//! - `OFFPAY_CA_CERT`: PEM file with the CA that signs the remote's certificate
//! - `OFFPAY_POLICY_FILE`: optional `policy.json`
//! - `OFFPAY_WALLETS`: comma-separated wallet ids to register and sync
//! - `OFFPAY_SYNC_INTERVAL_SECS`: seconds between background passes (default 60)
//! - `OFFPAY_SIMULATE`: run against the in-process simulated ledger

use std::path::PathBuf;
use std::time::Duration;

use crate::models::WalletId;

const DEFAULT_DATA_DIR: &str = "./offpay-data";
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;

/// Top-level application configuration.
#[derive(Debug)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub remote: RemoteConfig,
    pub policy_file: Option<PathBuf>,
    pub wallets: Vec<WalletId>,
    pub sync_interval: Duration,
    pub simulate: bool,
}

/// Remote ledger endpoint and credentials.
#[derive(Debug)]
pub struct RemoteConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub ca_cert: Option<PathBuf>,
}

/// Loads the application configuration from environment variables.
///
/// # Errors
///
/// Returns [`OffpayError::Config`](crate::OffpayError::Config) if only one
/// credential variable is set, the interval is not a positive integer, no
/// remote URL is given outside simulation, or an `https` remote has no CA.
pub fn fetch_config() -> crate::Result<AppConfig> {
    let data_dir = non_empty_var("OFFPAY_DATA_DIR")
        .map_or_else(|| PathBuf::from(DEFAULT_DATA_DIR), PathBuf::from);

    let api_key = non_empty_var("OFFPAY_API_KEY");
    let api_secret = non_empty_var("OFFPAY_API_SECRET");

    match (&api_key, &api_secret) {
        (Some(_), None) => {
            return Err(crate::OffpayError::Config(
                "OFFPAY_API_KEY is set but OFFPAY_API_SECRET is missing".to_string(),
            ));
        }
        (None, Some(_)) => {
            return Err(crate::OffpayError::Config(
                "OFFPAY_API_SECRET is set but OFFPAY_API_KEY is missing".to_string(),
            ));
        }
        _ => {}
    }

    let sync_interval = match non_empty_var("OFFPAY_SYNC_INTERVAL_SECS") {
        Some(raw) => match raw.parse::<u64>() {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => {
                return Err(crate::OffpayError::Config(format!(
                    "OFFPAY_SYNC_INTERVAL_SECS must be a positive integer, got {raw:?}"
                )));
            }
        },
        None => Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
    };

    let wallets = non_empty_var("OFFPAY_WALLETS")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(WalletId::new)
                .collect()
        })
        .unwrap_or_default();

    let simulate = non_empty_var("OFFPAY_SIMULATE")
        .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"));

    let remote = RemoteConfig {
        url: non_empty_var("OFFPAY_REMOTE_URL"),
        api_key,
        api_secret,
        ca_cert: non_empty_var("OFFPAY_CA_CERT").map(PathBuf::from),
    };

    if !simulate {
        let Some(url) = &remote.url else {
            return Err(crate::OffpayError::Config(
                "OFFPAY_REMOTE_URL is required unless OFFPAY_SIMULATE is set".to_string(),
            ));
        };
        if url.starts_with("https://") && remote.ca_cert.is_none() {
            return Err(crate::OffpayError::Config(
                "OFFPAY_CA_CERT is required for an https remote".to_string(),
            ));
        }
    }

    Ok(AppConfig {
        data_dir,
        remote,
        policy_file: non_empty_var("OFFPAY_POLICY_FILE").map(PathBuf::from),
        wallets,
        sync_interval,
        simulate,
    })
}

/// Returns the value of an environment variable if it exists and is non-empty.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}
