//! API credentials for the remote ledger.
//!
//! Credentials come from `OFFPAY_API_KEY` / `OFFPAY_API_SECRET` when both are
//! set, and otherwise from the system keychain, where
//! `offpay store-credentials` puts them. The secret never leaves a
//! [`Zeroizing`] buffer on its way to the [`RequestSigner`](crate::auth::RequestSigner).

use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::config::RemoteConfig;

/// Keychain service name used for all stored credentials.
const SERVICE: &str = "offpay";

/// Remote ledger credentials managed by this module.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialKey {
    ApiKey,
    ApiSecret,
}

impl CredentialKey {
    pub const ALL: [CredentialKey; 2] = [Self::ApiKey, Self::ApiSecret];

    /// Keychain entry identifier.
    pub fn keyring_id(self) -> &'static str {
        match self {
            Self::ApiKey => "ledger_api_key",
            Self::ApiSecret => "ledger_api_secret",
        }
    }

    /// Environment variable that overrides the keychain entry.
    pub fn env_var(self) -> &'static str {
        match self {
            Self::ApiKey => "OFFPAY_API_KEY",
            Self::ApiSecret => "OFFPAY_API_SECRET",
        }
    }
}

/// Where the resolved credentials were found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialSource {
    Environment,
    Keychain,
}

/// A key/secret pair ready for request signing.
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: Zeroizing<String>,
    pub source: CredentialSource,
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Secret storage the credentials can be read from and written to.
pub trait CredentialStore {
    /// Returns the stored value, or `None` if there is none or it is unreadable.
    fn load(&self, key: CredentialKey) -> Option<Zeroizing<String>>;

    /// # Errors
    ///
    /// Returns [`OffpayError::Config`](crate::OffpayError::Config) if the
    /// store refuses the write.
    fn save(&self, key: CredentialKey, value: &str) -> crate::Result<()>;
}

/// The operating system keychain.
#[derive(Debug, Default, Clone, Copy)]
pub struct Keychain;

impl CredentialStore for Keychain {
    fn load(&self, key: CredentialKey) -> Option<Zeroizing<String>> {
        let entry = keyring::Entry::new(SERVICE, key.keyring_id()).ok()?;
        match entry.get_password() {
            Ok(password) => Some(Zeroizing::new(password)),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!(key = key.keyring_id(), error = %e, "failed to read keychain entry");
                None
            }
        }
    }

    fn save(&self, key: CredentialKey, value: &str) -> crate::Result<()> {
        let entry = keyring::Entry::new(SERVICE, key.keyring_id())
            .map_err(|e| crate::OffpayError::Config(format!("keyring entry error: {e}")))?;
        entry
            .set_password(value)
            .map_err(|e| crate::OffpayError::Config(format!("failed to save to keychain: {e}")))
    }
}

/// Picks the credentials to sign with.
///
/// A pair from the environment wins. Otherwise both keychain entries must
/// be present; a lone entry is ignored with a warning.
pub fn resolve(remote: &RemoteConfig, store: &impl CredentialStore) -> Option<ApiCredentials> {
    if let (Some(api_key), Some(api_secret)) = (&remote.api_key, &remote.api_secret) {
        return Some(ApiCredentials {
            api_key: api_key.clone(),
            api_secret: Zeroizing::new(api_secret.clone()),
            source: CredentialSource::Environment,
        });
    }

    match (
        store.load(CredentialKey::ApiKey),
        store.load(CredentialKey::ApiSecret),
    ) {
        (Some(api_key), Some(api_secret)) => {
            debug!("loaded API credentials from keychain");
            Some(ApiCredentials {
                api_key: api_key.as_str().to_string(),
                api_secret,
                source: CredentialSource::Keychain,
            })
        }
        (None, None) => None,
        _ => {
            warn!("keychain holds only one of the API key and secret; ignoring it");
            None
        }
    }
}
