//! TLS client configuration and handshakes.
//!
//! Certificate verification is *optional*: chains are checked against
//! the probed system roots when a bundle was found, but a failed check
//! only logs a warning and the handshake proceeds. Signature validation
//! on the handshake itself still applies. Harden [`LenientVerifier`] if
//! strict verification is ever required.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::{Error, Result};

/// Directories probed for system trust anchors; the first that yields
/// certificates wins.
const CA_DIRECTORIES: &[&str] = &[
    "/etc/ssl/certs",
    "/etc/pki/tls/certs",
    "/usr/local/share/certs",
    "/etc/ssl",
];

/// Bundle files tried when no directory yields certificates.
const CA_BUNDLES: &[&str] = &[
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/pki/tls/certs/ca-bundle.crt",
];

/// Shared TLS connector: SNI from the request host, TLS 1.2 minimum.
pub struct TlsClient {
    connector: TlsConnector,
}

impl TlsClient {
    pub fn new() -> Result<Self> {
        let provider = Arc::new(ring::default_provider());
        let roots = load_system_roots();
        let verifier = LenientVerifier::new(roots, provider.clone())?;

        let config = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
            .map_err(|e| Error::Tls(format!("protocol version setup failed: {e}")))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
        })
    }

    /// Handshake over an established TCP stream, with `host` as SNI.
    pub async fn handshake(&self, stream: TcpStream, host: &str) -> Result<TlsStream<TcpStream>> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| Error::Tls(format!("invalid SNI hostname: {host}")))?;
        self.connector
            .connect(server_name, stream)
            .await
            .map_err(|e| Error::Tls(format!("handshake with {host} failed: {e}")))
    }
}

/// Collect trust anchors from the probed locations.
fn load_system_roots() -> RootCertStore {
    let mut store = RootCertStore::empty();
    for dir in CA_DIRECTORIES {
        if add_from_directory(&mut store, Path::new(dir)) > 0 {
            tracing::debug!("loaded {} trust anchors from {dir}", store.len());
            return store;
        }
    }
    for bundle in CA_BUNDLES {
        if add_from_file(&mut store, Path::new(bundle)) > 0 {
            tracing::debug!("loaded {} trust anchors from {bundle}", store.len());
            return store;
        }
    }
    tracing::warn!("no system CA bundle found; certificate chains cannot be checked");
    store
}

fn add_from_directory(store: &mut RootCertStore, dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let mut added = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() {
            added += add_from_file(store, &path);
        }
    }
    added
}

fn add_from_file(store: &mut RootCertStore, path: &Path) -> usize {
    let Ok(data) = fs::read(path) else {
        return 0;
    };
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut data.as_slice())
        .filter_map(|cert| cert.ok())
        .collect();
    let (added, _) = store.add_parsable_certificates(certs);
    added
}

/// Verifies chains when roots are available but never fails the
/// handshake over an untrusted peer.
#[derive(Debug)]
struct LenientVerifier {
    webpki: Option<Arc<WebPkiServerVerifier>>,
    provider: Arc<CryptoProvider>,
}

impl LenientVerifier {
    fn new(roots: RootCertStore, provider: Arc<CryptoProvider>) -> Result<Self> {
        let webpki = if roots.is_empty() {
            None
        } else {
            let verifier = WebPkiServerVerifier::builder_with_provider(
                Arc::new(roots),
                provider.clone(),
            )
            .build()
            .map_err(|e| Error::Tls(format!("verifier setup failed: {e}")))?;
            Some(verifier)
        };
        Ok(Self { webpki, provider })
    }
}

impl ServerCertVerifier for LenientVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if let Some(webpki) = &self.webpki {
            match webpki.verify_server_cert(
                end_entity,
                intermediates,
                server_name,
                ocsp_response,
                now,
            ) {
                Ok(verified) => return Ok(verified),
                Err(err) => {
                    tracing::warn!(
                        "certificate verification for {server_name:?} failed (ignored): {err}"
                    );
                }
            }
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
