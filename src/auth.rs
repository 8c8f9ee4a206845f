//! Request signing for the remote ledger API.
//!
//! Every request carries three headers:
//! - `X-Api-Key`: the API key
//! - `X-Api-Nonce`: a strictly increasing nonce
//! - `X-Api-Sign`: `Base64(HMAC-SHA512(Base64Decode(secret), path + SHA256(nonce + body)))`

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::prelude::*;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroizing;

use crate::credentials::ApiCredentials;
use crate::sync::RemoteError;

pub const API_KEY_HEADER: &str = "X-Api-Key";
pub const NONCE_HEADER: &str = "X-Api-Nonce";
pub const SIGNATURE_HEADER: &str = "X-Api-Sign";

/// Tracks the last nonce issued so every call returns a strictly
/// increasing value even when the wall-clock hasn't advanced.
///
/// Uses nanosecond resolution in a `u64`, which overflows around year 2554.
static LAST_NONCE: AtomicU64 = AtomicU64::new(0);

/// Header values for one signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub api_key: String,
    pub nonce: u64,
    pub signature: String,
}

/// Signs requests with an API key and its base64-encoded secret.
pub struct RequestSigner {
    api_key: String,
    secret: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

impl RequestSigner {
    /// # Errors
    ///
    /// Returns [`RemoteError::Auth`] if the secret is not valid base64.
    pub fn new(api_key: &str, api_secret: &str) -> Result<Self, RemoteError> {
        let secret = BASE64_STANDARD
            .decode(api_secret)
            .map_err(|e| RemoteError::Auth(format!("invalid base64 api secret: {e}")))?;
        Ok(Self {
            api_key: api_key.to_string(),
            secret: Zeroizing::new(secret),
        })
    }

    /// # Errors
    ///
    /// Returns [`RemoteError::Auth`] if the stored secret is not valid base64.
    pub fn from_credentials(credentials: &ApiCredentials) -> Result<Self, RemoteError> {
        Self::new(&credentials.api_key, &credentials.api_secret)
    }

    /// Signs a request to `path` with the given body (empty for `GET`).
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Auth`] if the HMAC key is rejected.
    pub fn sign(&self, path: &str, body: &[u8]) -> Result<SignedHeaders, RemoteError> {
        let nonce = next_nonce();
        Ok(SignedHeaders {
            api_key: self.api_key.clone(),
            nonce,
            signature: self.signature(path, nonce, body)?,
        })
    }

    fn signature(&self, path: &str, nonce: u64, body: &[u8]) -> Result<String, RemoteError> {
        let mut sha256 = Sha256::new();
        sha256.update(nonce.to_string().as_bytes());
        sha256.update(body);
        let sha256_digest = sha256.finalize();

        let mut hmac_input = Vec::from(path.as_bytes());
        hmac_input.extend_from_slice(&sha256_digest);

        let mut mac = Hmac::<Sha512>::new_from_slice(&self.secret)
            .map_err(|e| RemoteError::Auth(format!("invalid HMAC key: {e}")))?;
        mac.update(&hmac_input);
        Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
    }
}

/// Returns a strictly monotonically-increasing nonce with nanosecond resolution.
///
/// Uses the wall-clock as the baseline but guarantees that successive calls
/// always return a value larger than the previous one, even when the clock
/// resolution is too coarse or the clock jumps backwards.
fn next_nonce() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();

    let mut prev = LAST_NONCE.load(Ordering::Relaxed);
    loop {
        let nonce = now.max(prev + 1);
        match LAST_NONCE.compare_exchange_weak(prev, nonce, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return nonce,
            Err(actual) => prev = actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> RequestSigner {
        // 32 bytes of zeros, base64-encoded.
        RequestSigner::new("key-1", &BASE64_STANDARD.encode([0u8; 32])).unwrap()
    }

    #[test]
    fn builds_from_keychain_credentials() {
        let credentials = ApiCredentials {
            api_key: "key-1".to_string(),
            api_secret: Zeroizing::new(BASE64_STANDARD.encode([0u8; 32])),
            source: crate::credentials::CredentialSource::Keychain,
        };
        let from_creds = RequestSigner::from_credentials(&credentials).unwrap();
        let body = b"{}";
        assert_eq!(
            from_creds.signature("/wallets/w1", 7, body).unwrap(),
            signer().signature("/wallets/w1", 7, body).unwrap()
        );

        let bad = ApiCredentials {
            api_secret: Zeroizing::new("%%%".to_string()),
            ..credentials
        };
        assert!(RequestSigner::from_credentials(&bad).is_err());
    }

    #[test]
    fn signature_is_deterministic_for_same_nonce() {
        let signer = signer();
        let body = br#"{"reference_id":"OFF1"}"#;
        let sig1 = signer.signature("/transactions", 1_000, body).unwrap();
        let sig2 = signer.signature("/transactions", 1_000, body).unwrap();
        assert_eq!(sig1, sig2);
        assert!(BASE64_STANDARD.decode(&sig1).is_ok());
    }

    #[test]
    fn signature_covers_path_and_body() {
        let signer = signer();
        let base = signer.signature("/transactions", 7, b"a").unwrap();
        assert_ne!(base, signer.signature("/wallets/w1", 7, b"a").unwrap());
        assert_ne!(base, signer.signature("/transactions", 7, b"b").unwrap());
        assert_ne!(base, signer.signature("/transactions", 8, b"a").unwrap());
    }

    #[test]
    fn rejects_invalid_base64_secret() {
        let err = RequestSigner::new("key", "not-valid-base64!!!").unwrap_err();
        assert_eq!(err.kind(), "remote_auth");
    }

    #[test]
    fn debug_hides_secret() {
        let rendered = format!("{:?}", signer());
        assert!(rendered.contains("key-1"));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn sign_uses_fresh_nonces() {
        let signer = signer();
        let a = signer.sign("/transactions", b"").unwrap();
        let b = signer.sign("/transactions", b"").unwrap();
        assert!(b.nonce > a.nonce);
        assert_eq!(a.api_key, "key-1");
    }

    #[test]
    fn next_nonce_is_strictly_monotonic() {
        let mut prev = next_nonce();
        for _ in 0..1_000 {
            let current = next_nonce();
            assert!(
                current > prev,
                "nonce did not increase: {prev} -> {current}"
            );
            prev = current;
        }
    }
}
