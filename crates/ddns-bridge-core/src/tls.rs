//! TLS identity loading
//!
//! The daemon ships a self-signed certificate and a PKCS#8 private key
//! embedded in the binary. Routers speaking the DynDNS protocol insist on
//! HTTPS but do not verify the chain, so the identity only has to be
//! well-formed. It is decoded exactly once at startup; a key that cannot be
//! parsed stops the process before anything is served.

use crate::error::{Error, Result};
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::sync::Arc;

/// ALPN protocols offered to clients
const ALPN_HTTP11: &[u8] = b"http/1.1";

/// Certificate plus matching private key, decoded from PEM
pub struct TlsIdentity {
    certificate: CertificateDer<'static>,
    private_key: PrivatePkcs8KeyDer<'static>,
}

impl TlsIdentity {
    /// Decode an identity from PEM blobs
    ///
    /// The key must be an unencrypted PKCS#8 `PRIVATE KEY` block. Only the
    /// first `CERTIFICATE` block of `cert_pem` is used.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let private_key = rustls_pemfile::pkcs8_private_keys(&mut &key_pem[..])
            .next()
            .ok_or_else(|| Error::tls("no PKCS#8 private key found in key material"))?
            .map_err(|e| Error::tls(format!("failed parsing tls private key: {e}")))?;

        let certificate = rustls_pemfile::certs(&mut &cert_pem[..])
            .next()
            .ok_or_else(|| Error::tls("no certificate found in certificate material"))?
            .map_err(|e| Error::tls(format!("failed parsing tls certificate: {e}")))?;

        Ok(Self {
            certificate,
            private_key,
        })
    }

    /// Raw DER bytes of the certificate
    pub fn certificate_der(&self) -> &[u8] {
        self.certificate.as_ref()
    }

    /// Build the rustls server configuration for this identity
    ///
    /// No client certificates are requested and only HTTP/1.1 is offered.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>> {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());

        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::tls(format!("unsupported protocol versions: {e}")))?
            .with_no_client_auth()
            .with_single_cert(
                vec![self.certificate.clone()],
                PrivateKeyDer::Pkcs8(self.private_key.clone_key()),
            )
            .map_err(|e| Error::tls(format!("invalid certificate/key pair: {e}")))?;

        config.alpn_protocols = vec![ALPN_HTTP11.to_vec()];

        Ok(Arc::new(config))
    }
}

impl std::fmt::Debug for TlsIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsIdentity")
            .field("certificate_len", &self.certificate.len())
            .field("private_key", &"<REDACTED>")
            .finish()
    }
}
