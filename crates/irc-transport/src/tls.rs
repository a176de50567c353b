//! TLS connector that trusts only a caller-supplied root CA bundle.
//!
//! The system trust store is deliberately not consulted: the relay talks to
//! one private network whose certificates chain to the configured CA.

use std::path::Path;
use std::sync::Arc;

use relay::TransportError;
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

fn tls_error(message: impl Into<String>) -> TransportError {
    TransportError::Tls {
        message: message.into(),
    }
}

/// Parses every certificate in a PEM bundle into a root store.
///
/// # Errors
///
/// [`TransportError::Tls`] if the bundle holds no usable certificate.
pub fn root_store_from_pem(pem: &[u8]) -> Result<RootCertStore, TransportError> {
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut &pem[..]) {
        let cert = cert.map_err(|err| tls_error(format!("invalid PEM data: {err}")))?;
        roots
            .add(cert)
            .map_err(|err| tls_error(format!("unusable CA certificate: {err}")))?;
    }
    if roots.is_empty() {
        return Err(tls_error("no certificates found in CA bundle"));
    }
    Ok(roots)
}

/// Reads the CA bundle at `path`.
pub async fn load_root_store(path: &Path) -> Result<RootCertStore, TransportError> {
    let pem = tokio::fs::read(path)
        .await
        .map_err(|err| tls_error(format!("cannot read CA file '{}': {err}", path.display())))?;
    root_store_from_pem(&pem).map_err(|err| match err {
        TransportError::Tls { message } => {
            tls_error(format!("{message} ('{}')", path.display()))
        }
        other => other,
    })
}

/// Builds a connector verifying servers against `roots` only.
pub fn connector(roots: RootCertStore) -> Result<TlsConnector, TransportError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|err| tls_error(format!("unsupported protocol versions: {err}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_without_certificates_is_rejected() {
        let err = root_store_from_pem(b"just some text\n").unwrap_err();
        assert!(matches!(err, TransportError::Tls { .. }));
    }

    #[tokio::test]
    async fn missing_ca_file_is_a_tls_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_root_store(&dir.path().join("absent.crt"))
            .await
            .unwrap_err();
        let TransportError::Tls { message } = err else {
            panic!("expected a TLS error");
        };
        assert!(message.contains("absent.crt"));
    }

    #[tokio::test]
    async fn empty_ca_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.crt");
        std::fs::write(&path, "").unwrap();
        let err = load_root_store(&path).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::Tls {
                message: format!("no certificates found in CA bundle ('{}')", path.display())
            }
        );
    }
}
