//! TLS client setup with public-key pinning.
//!
//! # Design
//! Server certificates go through the standard WebPKI chain check first. A
//! chain that passes is then subjected to a second, independent check: the
//! leaf certificate's SubjectPublicKeyInfo must be byte-for-byte equal to one
//! entry of a small allow-list. This keeps a compromised or substituted CA
//! from impersonating the backend.
//!
//! The pin check is a `KeyVerifier` so the allow-list policy can be swapped
//! without touching the rustls plumbing.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::net::TcpStream;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    CertificateError, ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore,
    SignatureScheme, StreamOwned,
};

use crate::config::TlsConfig;
use crate::error::{ErrorCode, TlsSetupError, TransferError};

/// DER SubjectPublicKeyInfo of the storage backend's TLS keys (current and
/// standby), base64 encoded.
pub const BACKEND_PINNED_KEYS: &[&str] = &[
    "MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAnztMK96WHCfokvPqzsqx4IrD0EWo8LOK7LRy2Zuf63r0Z7M3cgobTt1XtQa5U+8v1mh7dQrtCdvdZncqgqcYTAXhf164yicFyIbEVic5Ihz2omY7wt1tx/n8sGjT4R4yAio5+RxAzP4ZGAgEuG+BHYiH9g1tJYViibuinJ+kSZWvA8p/3SymHxmsoQmDMX+jx1s/MlgR4gg6WnPQ44v+/lVxIzJpVnNJdvL0zEw9fbIEp5Ikojs/0Doly/774XusQ23mwA8tdZaYqU9Ho0nKVP+8r7TPZAW81l7KOeGgca3u6itonkg0NdSv/0EgoZFFE8XRfJMcr66+XrpDTZNr1wIDAQAB",
    "MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEApl3j8Y0JIoSeBSfrcuRAo5rzLnWvYr1GvokpKw+ut8QaGxIOEqpNFJW1iuwmS7YAScrtGbzGeqXFQNR7q/qC4VBIXql5HtndOrRMgkuwNaW4H7t0MHOmnP/O/vJMFiQIRWhELiirBEAdAbETSpO/aOjcRQ51jqs5qXatdpPszmZtdtxOOiQK4cHeXpaX0hwZU3NFpMlRr8j1HkOv2oUwDOz5tC4jGDATXRyEulu7tWlc4howyCpsg6IL3knzJNZU33BE/FTT3sAdzMgyKsBEd4Lm/Zr+aBbiFAzOznf8+RCqtnOc/f9YdE68UbLdbDpf/u3yAQb8apRrcnD6FjF0dwIDAQAB",
];

/// Accepts or rejects a peer by its leaf public key.
pub trait KeyVerifier: Send + Sync + fmt::Debug {
    /// `spki_der` is the DER-encoded SubjectPublicKeyInfo of the leaf.
    fn verify_key(&self, spki_der: &[u8]) -> bool;
}

/// Allow-list of DER SubjectPublicKeyInfo values.
#[derive(Clone, PartialEq, Eq)]
pub struct PinnedKeys {
    keys: Vec<Vec<u8>>,
}

impl PinnedKeys {
    pub fn new(keys: Vec<Vec<u8>>) -> Self {
        Self { keys }
    }

    /// The allow-list compiled into the client.
    pub fn backend() -> Self {
        // The constants are checked by `backend_pins_decode`.
        Self::from_base64(BACKEND_PINNED_KEYS).unwrap_or_else(|_| Self::new(Vec::new()))
    }

    pub fn from_base64<S: AsRef<str>>(encoded: &[S]) -> Result<Self, TlsSetupError> {
        let keys = encoded
            .iter()
            .enumerate()
            .map(|(index, key)| {
                BASE64
                    .decode(key.as_ref().trim())
                    .map_err(|err| TlsSetupError::PinnedKey {
                        index,
                        reason: err.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(keys))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeyVerifier for PinnedKeys {
    fn verify_key(&self, spki_der: &[u8]) -> bool {
        self.keys.iter().any(|key| key.as_slice() == spki_der)
    }
}

impl fmt::Debug for PinnedKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedKeys").field("count", &self.keys.len()).finish()
    }
}

/// Extract the DER SubjectPublicKeyInfo from a DER certificate.
pub fn leaf_spki(cert_der: &[u8]) -> Option<Vec<u8>> {
    let (_, cert) = x509_parser::parse_x509_certificate(cert_der).ok()?;
    Some(cert.public_key().raw.to_vec())
}

/// Standard chain validation followed by the public-key pin check.
#[derive(Debug)]
pub struct PinningVerifier {
    chain: Arc<WebPkiServerVerifier>,
    keys: Arc<dyn KeyVerifier>,
}

impl PinningVerifier {
    pub fn new(chain: Arc<WebPkiServerVerifier>, keys: Arc<dyn KeyVerifier>) -> Self {
        Self { chain, keys }
    }
}

impl ServerCertVerifier for PinningVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let verified = self.chain.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        )?;

        let Some(spki) = leaf_spki(end_entity.as_ref()) else {
            tracing::warn!(server = ?server_name, "cannot parse leaf certificate");
            return Err(rustls::Error::InvalidCertificate(CertificateError::BadEncoding));
        };

        if !self.keys.verify_key(&spki) {
            tracing::warn!(server = ?server_name, "leaf public key is not pinned");
            return Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            ));
        }

        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.chain.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.chain.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.chain.supported_verify_schemes()
    }
}

pub type TlsStream = StreamOwned<ClientConnection, TcpStream>;

/// Performs client handshakes. Without a client configuration every
/// handshake fails with `no_tls`.
#[derive(Debug, Clone)]
pub struct Connector {
    config: Option<Arc<ClientConfig>>,
}

impl Connector {
    pub fn from_config(tls: &TlsConfig) -> Result<Self, TlsSetupError> {
        if !tls.enabled {
            return Ok(Self::disabled());
        }

        let keys = match &tls.pinned_keys {
            Some(encoded) => PinnedKeys::from_base64(encoded)?,
            None => PinnedKeys::backend(),
        };

        let mut roots = RootCertStore::empty();
        if tls.webpki_roots {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
        if let Some(path) = &tls.extra_roots_pem {
            let mut reader = BufReader::new(File::open(path)?);
            for cert in rustls_pemfile::certs(&mut reader) {
                roots.add(cert?)?;
            }
        }
        tracing::debug!(roots = roots.len(), pins = keys.len(), "building tls client config");

        Self::with_verifier(roots, Arc::new(keys))
    }

    /// Build a connector from explicit roots and a custom key policy.
    pub fn with_verifier(
        roots: RootCertStore,
        keys: Arc<dyn KeyVerifier>,
    ) -> Result<Self, TlsSetupError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let chain = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()?;
        let verifier = Arc::new(PinningVerifier::new(chain, keys));
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();
        Ok(Self {
            config: Some(Arc::new(config)),
        })
    }

    pub fn disabled() -> Self {
        Self { config: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_some()
    }

    /// Run the TLS handshake to completion over `tcp`.
    pub(crate) fn connect(&self, mut tcp: TcpStream, host: &str) -> Result<TlsStream, TransferError> {
        let config = self.config.as_ref().ok_or_else(|| {
            TransferError::new(ErrorCode::NoTls, "TLS support is not available in this engine")
        })?;
        let name = ServerName::try_from(host.to_string())
            .map_err(|err| TransferError::caused_by(ErrorCode::ConnFail, "Connection failed: ", err))?;
        let mut conn = ClientConnection::new(config.clone(), name)
            .map_err(|err| TransferError::caused_by(ErrorCode::ConnFail, "Connection failed: ", err))?;

        while conn.is_handshaking() {
            conn.complete_io(&mut tcp).map_err(|err| {
                TransferError::caused_by(ErrorCode::ConnFail, "TLS handshake failed: ", err)
            })?;
        }
        Ok(StreamOwned::new(conn, tcp))
    }
}
