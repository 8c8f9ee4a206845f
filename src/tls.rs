//! TLS configuration with a pinned CA root certificate.
//!
//! The ledger backend is reached over TLS that trusts only the CA given in
//! `OFFPAY_CA_CERT`, never the platform trust store.

use std::path::Path;

use rustls::ClientConfig;

use crate::Result;

/// Builds a [`ClientConfig`] whose root store contains only the
/// certificates in the PEM file at `path`.
///
/// # Errors
///
/// Returns [`OffpayError::Tls`](crate::OffpayError::Tls) if the file cannot
/// be read or holds no usable certificate.
pub fn build_tls_config(path: &Path) -> Result<ClientConfig> {
    let pem = std::fs::read(path).map_err(|e| {
        crate::OffpayError::Tls(format!("failed to read CA file {}: {e}", path.display()))
    })?;
    tls_config_from_pem(&pem)
}

/// Builds a pinned-root [`ClientConfig`] from PEM bytes.
///
/// # Errors
///
/// Returns [`OffpayError::Tls`](crate::OffpayError::Tls) if the PEM cannot
/// be parsed or contains no certificate.
pub fn tls_config_from_pem(pem: &[u8]) -> Result<ClientConfig> {
    let mut root_store = rustls::RootCertStore::empty();

    let certs: Vec<_> = rustls_pemfile::certs(&mut &pem[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| crate::OffpayError::Tls(format!("failed to parse CA PEM: {e}")))?;

    let (added, _ignored) = root_store.add_parsable_certificates(certs);
    if added == 0 {
        return Err(crate::OffpayError::Tls(
            "CA PEM contains no usable certificate".to_string(),
        ));
    }

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pem_is_rejected() {
        let err = tls_config_from_pem(b"").unwrap_err();
        assert_eq!(err.kind(), "tls");
    }

    #[test]
    fn non_certificate_pem_is_rejected() {
        let pem = b"-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
        assert!(tls_config_from_pem(pem).is_err());
    }

    #[test]
    fn missing_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = build_tls_config(&dir.path().join("absent.pem")).unwrap_err();
        assert!(err.to_string().contains("absent.pem"));
    }
}
