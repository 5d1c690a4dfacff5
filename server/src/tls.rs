//! # Upstream TLS
//!
//! Builds the rustls client configuration used for `wss://` connections to
//! console endpoints. Virtualization clusters often sign their API
//! certificates with a private root CA, so an extra PEM bundle can be
//! trusted on top of the public web roots. Verification can also be turned
//! off entirely, which is only meant for lab setups.

use crate::config::UpstreamTrust;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("cannot read CA bundle {path}: {source}")]
    ReadCa {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no certificates found in CA bundle {0}")]
    EmptyCa(PathBuf),

    #[error("tls configuration error: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Client configuration for upstream connections under the given trust mode.
pub fn client_config(trust: &UpstreamTrust) -> Result<Arc<ClientConfig>, TlsError> {
    let provider = Arc::new(ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let config = match trust {
        UpstreamTrust::Verify { extra_ca } => {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            if let Some(path) = extra_ca {
                let added = add_pem_bundle(&mut roots, path)?;
                info!(path = %path.display(), certificates = added, "trusting extra upstream CA bundle");
            }
            builder.with_root_certificates(roots).with_no_client_auth()
        }
        UpstreamTrust::Insecure => {
            warn!("upstream certificate verification is DISABLED");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerification(provider)))
                .with_no_client_auth()
        }
    };

    Ok(Arc::new(config))
}

fn add_pem_bundle(roots: &mut RootCertStore, path: &Path) -> Result<usize, TlsError> {
    let read_err = |source: std::io::Error| TlsError::ReadCa {
        path: path.to_path_buf(),
        source,
    };
    let pem = std::fs::read(path).map_err(read_err)?;

    let mut added = 0;
    for cert in rustls_pemfile::certs(&mut &pem[..]) {
        roots.add(cert.map_err(read_err)?)?;
        added += 1;
    }
    if added == 0 {
        return Err(TlsError::EmptyCa(path.to_path_buf()));
    }
    Ok(added)
}

/// Accepts any server certificate. Handshake signatures are still checked
/// so the session keys belong to whoever presented the certificate.
#[derive(Debug)]
struct NoVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
