//! Credential resolution and parsing.
//!
//! A credential reference is either a filesystem path or inline material. The
//! string form uses a single rule: a leading `/` means path, anything else
//! (including the empty string) is inline PEM or DER.

use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::ParsedCertificate;
use rustls::RootCertStore;
use thiserror::Error;

const PEM_ARMOUR: &[u8] = b"-----BEGIN";
const DER_SEQUENCE_TAG: u8 = 0x30;

/// Which artifact a credential plays in the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialRole {
    RootCa,
    DeviceCert,
    PrivateKey,
}

impl fmt::Display for CredentialRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialRole::RootCa => write!(f, "root CA"),
            CredentialRole::DeviceCert => write!(f, "device certificate"),
            CredentialRole::PrivateKey => write!(f, "device private key"),
        }
    }
}

/// Failures while loading or parsing credential material.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed PEM: {0}")]
    Pem(#[source] io::Error),

    #[error("no certificate found")]
    NoCertificate,

    #[error("no supported private key found")]
    NoPrivateKey,

    #[error("malformed credential: {0}")]
    Malformed(String),
}

/// Where credential bytes come from.
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Path(PathBuf),
    Inline(Vec<u8>),
}

impl CredentialSource {
    /// Classify a credential string.
    pub fn resolve(reference: &str) -> Self {
        if reference.starts_with('/') {
            Self::Path(PathBuf::from(reference))
        } else {
            Self::Inline(reference.as_bytes().to_vec())
        }
    }

    pub fn is_path(&self) -> bool {
        matches!(self, Self::Path(_))
    }

    /// Read the raw bytes behind this source.
    pub fn load(&self) -> Result<Vec<u8>, CredentialError> {
        match self {
            Self::Path(path) => fs::read(path).map_err(|source| CredentialError::Read {
                path: path.clone(),
                source,
            }),
            Self::Inline(bytes) => Ok(bytes.clone()),
        }
    }
}

impl From<&str> for CredentialSource {
    fn from(reference: &str) -> Self {
        Self::resolve(reference)
    }
}

impl From<String> for CredentialSource {
    fn from(reference: String) -> Self {
        Self::resolve(&reference)
    }
}

// Inline material may be a private key; never print it.
impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Inline(bytes) => write!(f, "Inline(<{} bytes>)", bytes.len()),
        }
    }
}

fn is_pem(bytes: &[u8]) -> bool {
    bytes.windows(PEM_ARMOUR.len()).any(|window| window == PEM_ARMOUR)
}

/// Parse one or more certificates from PEM or a single DER certificate.
///
/// Every entry must decode as an X.509 certificate; the PEM or DER envelope
/// alone is not enough.
pub fn parse_certificates(bytes: &[u8]) -> Result<Vec<CertificateDer<'static>>, CredentialError> {
    let certs = if is_pem(bytes) {
        let mut reader = bytes;
        rustls_pemfile::certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(CredentialError::Pem)?
    } else {
        match bytes.first() {
            Some(&DER_SEQUENCE_TAG) => vec![CertificateDer::from(bytes.to_vec())],
            Some(_) => {
                return Err(CredentialError::Malformed(
                    "neither PEM armour nor a DER sequence".into(),
                ))
            }
            None => Vec::new(),
        }
    };

    if certs.is_empty() {
        return Err(CredentialError::NoCertificate);
    }
    for cert in &certs {
        ParsedCertificate::try_from(cert)
            .map_err(|err| CredentialError::Malformed(err.to_string()))?;
    }
    Ok(certs)
}

/// Parse a private key from PEM (PKCS#1, PKCS#8 or SEC1) or DER.
///
/// Encrypted keys are not supported and report [`CredentialError::NoPrivateKey`].
pub fn parse_private_key(bytes: &[u8]) -> Result<PrivateKeyDer<'static>, CredentialError> {
    let key = if is_pem(bytes) {
        let mut reader = bytes;
        rustls_pemfile::private_key(&mut reader)
            .map_err(CredentialError::Pem)?
            .ok_or(CredentialError::NoPrivateKey)?
    } else if bytes.is_empty() {
        return Err(CredentialError::NoPrivateKey);
    } else {
        PrivateKeyDer::try_from(bytes.to_vec())
            .map_err(|reason| CredentialError::Malformed(reason.to_string()))?
    };

    // The structural parse above only checks the envelope.
    rustls::crypto::ring::sign::any_supported_type(&key)
        .map_err(|err| CredentialError::Malformed(err.to_string()))?;

    Ok(key)
}

/// Parse CA certificates into a trust-anchor store.
pub fn parse_trust_anchors(bytes: &[u8]) -> Result<RootCertStore, CredentialError> {
    let mut roots = RootCertStore::empty();
    for cert in parse_certificates(bytes)? {
        roots
            .add(cert)
            .map_err(|err| CredentialError::Malformed(err.to_string()))?;
    }
    Ok(roots)
}

/// Parsed material for one connection attempt.
///
/// Field order is release order: device chain, trust anchors, private key.
pub struct ClientCredentials {
    pub device_chain: Vec<CertificateDer<'static>>,
    pub trust_anchors: Arc<RootCertStore>,
    pub private_key: PrivateKeyDer<'static>,
}

impl ClientCredentials {
    /// Resolve and parse all three credentials, root CA first.
    ///
    /// The error carries the role of the first credential that failed.
    pub fn load(
        root_ca: &CredentialSource,
        device_cert: &CredentialSource,
        private_key: &CredentialSource,
    ) -> Result<Self, (CredentialRole, CredentialError)> {
        let trust_anchors = root_ca
            .load()
            .and_then(|bytes| parse_trust_anchors(&bytes))
            .map_err(|err| (CredentialRole::RootCa, err))?;
        tracing::debug!(anchors = trust_anchors.len(), "Root CA parsed");

        let device_chain = device_cert
            .load()
            .and_then(|bytes| parse_certificates(&bytes))
            .map_err(|err| (CredentialRole::DeviceCert, err))?;
        tracing::debug!(chain_len = device_chain.len(), "Device certificate parsed");

        let private_key = private_key
            .load()
            .and_then(|bytes| parse_private_key(&bytes))
            .map_err(|err| (CredentialRole::PrivateKey, err))?;
        tracing::debug!("Device private key parsed");

        Ok(Self {
            device_chain,
            trust_anchors: Arc::new(trust_anchors),
            private_key,
        })
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("device_chain_len", &self.device_chain.len())
            .field("trust_anchors", &self.trust_anchors.len())
            .finish_non_exhaustive()
    }
}
