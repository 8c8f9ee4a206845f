//! HTTP client for the remote ledger API.
//!
//! - `GET {base}/wallets/{wallet_id}` returns a [`RemoteWallet`].
//! - `POST {base}/transactions` takes a [`SubmitRequest`]; the reference id
//!   doubles as the `Idempotency-Key` header.
//!
//! Submit responses are classified by status code: `2xx` accepted, `409`
//! already applied, `408`/`429`/`5xx` ambiguous, any other `4xx` refused.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::RemoteError;
use super::remote::{RemoteLedger, SubmitOutcome, SubmitRequest};
use crate::auth::{API_KEY_HEADER, NONCE_HEADER, RequestSigner, SIGNATURE_HEADER};
use crate::models::{RemoteWallet, WalletId};

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Body the remote returns for a submit, successful or not.
#[derive(Debug, Default, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    remote_id: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// [`RemoteLedger`] over HTTPS.
#[derive(Debug)]
pub struct HttpRemoteLedger {
    client: Client,
    base_url: String,
    signer: Option<RequestSigner>,
}

impl HttpRemoteLedger {
    /// Builds a client for `base_url`.
    ///
    /// `tls` is the pinned-root configuration from [`crate::tls`]; pass
    /// `None` only for plain `http://` endpoints. `timeout` bounds every
    /// request end to end.
    ///
    /// # Errors
    ///
    /// Returns [`OffpayError::Tls`](crate::OffpayError::Tls) if the HTTP
    /// client cannot be built.
    pub fn new(
        base_url: &str,
        tls: Option<rustls::ClientConfig>,
        signer: Option<RequestSigner>,
        timeout: Duration,
    ) -> crate::Result<Self> {
        let mut builder = Client::builder().timeout(timeout);
        if let Some(tls) = tls {
            builder = builder.use_preconfigured_tls(tls);
        }
        let client = builder
            .build()
            .map_err(|e| crate::OffpayError::Tls(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            signer,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn signed(
        &self,
        request: RequestBuilder,
        path: &str,
        body: &[u8],
    ) -> Result<RequestBuilder, RemoteError> {
        let Some(signer) = &self.signer else {
            return Ok(request);
        };
        let headers = signer.sign(path, body)?;
        Ok(request
            .header(API_KEY_HEADER, headers.api_key)
            .header(NONCE_HEADER, headers.nonce.to_string())
            .header(SIGNATURE_HEADER, headers.signature))
    }
}

impl RemoteLedger for HttpRemoteLedger {
    async fn fetch_wallet(&self, wallet_id: &WalletId) -> Result<RemoteWallet, RemoteError> {
        let path = format!("/wallets/{wallet_id}");
        let request = self.signed(self.client.get(self.endpoint(&path)), &path, b"")?;

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(wallet_id.clone()));
        }
        if !status.is_success() {
            return Err(RemoteError::Unreachable(format!(
                "wallet fetch returned {status}"
            )));
        }

        let body = response.bytes().await.map_err(transport_error)?;
        let wallet: RemoteWallet = serde_json::from_slice(&body)
            .map_err(|e| RemoteError::Malformed(format!("wallet {wallet_id}: {e}")))?;
        debug!(wallet_id = %wallet_id, balance = wallet.balance, "fetched remote wallet");
        Ok(wallet)
    }

    async fn submit(&self, request: &SubmitRequest) -> SubmitOutcome {
        let path = "/transactions";
        let body = match serde_json::to_vec(request) {
            Ok(body) => body,
            Err(e) => {
                // Nothing was sent, so the attempt cannot have landed.
                return SubmitOutcome::RejectedPolicy {
                    reason: format!("unencodable request: {e}"),
                };
            }
        };

        let builder = self
            .client
            .post(self.endpoint(path))
            .header(IDEMPOTENCY_HEADER, &request.reference_id)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        let builder = match self.signed(builder, path, &body) {
            Ok(builder) => builder,
            Err(e) => {
                return SubmitOutcome::Unreachable {
                    message: e.to_string(),
                };
            }
        };

        let response = match builder.body(body).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(reference_id = %request.reference_id, "submit transport failure: {e}");
                return SubmitOutcome::Unreachable {
                    message: transport_error(e).to_string(),
                };
            }
        };

        let status = response.status();
        match response.bytes().await {
            Ok(body) => classify(status, &body, &request.reference_id),
            Err(e) => SubmitOutcome::Unreachable {
                message: format!("response body lost after {status}: {e}"),
            },
        }
    }
}

/// Maps a submit response onto a [`SubmitOutcome`].
fn classify(status: StatusCode, body: &[u8], reference_id: &str) -> SubmitOutcome {
    let parsed: SubmitResponse = serde_json::from_slice(body).unwrap_or_default();

    if status.is_success() {
        return SubmitOutcome::Accepted {
            remote_id: parsed.remote_id.unwrap_or_else(|| reference_id.to_string()),
        };
    }

    match status {
        StatusCode::CONFLICT => SubmitOutcome::RejectedDuplicate {
            remote_id: parsed.remote_id.unwrap_or_else(|| reference_id.to_string()),
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => SubmitOutcome::Unreachable {
            message: format!("remote returned {status}"),
        },
        s if s.is_client_error() => SubmitOutcome::RejectedPolicy {
            reason: parsed
                .reason
                .unwrap_or_else(|| format!("remote returned {status}")),
        },
        _ => SubmitOutcome::Unreachable {
            message: format!("remote returned {status}"),
        },
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout
    } else if e.is_connect() {
        RemoteError::Unreachable(e.to_string())
    } else {
        RemoteError::Http(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_accepted_with_remote_id() {
        let outcome = classify(StatusCode::CREATED, br#"{"remote_id":"R-1"}"#, "OFF1");
        assert_eq!(
            outcome,
            SubmitOutcome::Accepted {
                remote_id: "R-1".into()
            }
        );
    }

    #[test]
    fn success_without_body_falls_back_to_reference() {
        let outcome = classify(StatusCode::OK, b"", "OFF1");
        assert_eq!(
            outcome,
            SubmitOutcome::Accepted {
                remote_id: "OFF1".into()
            }
        );
    }

    #[test]
    fn conflict_is_duplicate() {
        let outcome = classify(StatusCode::CONFLICT, br#"{"remote_id":"R-9"}"#, "OFF1");
        assert!(outcome.is_applied());
        assert_eq!(
            outcome,
            SubmitOutcome::RejectedDuplicate {
                remote_id: "R-9".into()
            }
        );
    }

    #[test]
    fn client_error_is_policy_rejection() {
        let outcome = classify(
            StatusCode::UNPROCESSABLE_ENTITY,
            br#"{"reason":"insufficient balance"}"#,
            "OFF1",
        );
        assert_eq!(
            outcome,
            SubmitOutcome::RejectedPolicy {
                reason: "insufficient balance".into()
            }
        );
    }

    #[test]
    fn throttling_and_server_errors_are_ambiguous() {
        for status in [
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
        ] {
            assert!(
                matches!(classify(status, b"", "OFF1"), SubmitOutcome::Unreachable { .. }),
                "{status} should be ambiguous"
            );
        }
    }

    #[test]
    fn redirect_is_ambiguous() {
        let outcome = classify(StatusCode::TEMPORARY_REDIRECT, b"", "OFF1");
        assert!(matches!(outcome, SubmitOutcome::Unreachable { .. }));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let remote =
            HttpRemoteLedger::new("http://127.0.0.1:9/", None, None, Duration::from_secs(1))
                .unwrap();
        assert_eq!(remote.endpoint("/transactions"), "http://127.0.0.1:9/transactions");
    }
}
