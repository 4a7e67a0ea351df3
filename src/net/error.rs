//! Transport error taxonomy.
//!
//! Every engine status and socket failure is translated into [`TransportError`]
//! before it leaves the `net` module. Callers branch on [`ErrorKind`] or on the
//! [`Recovery`] hint; they never see raw engine codes.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use super::credentials::{CredentialError, CredentialRole};

/// Errors surfaced by the transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A required input was missing.
    #[error("Required argument missing: {0}")]
    NullArgument(&'static str),

    /// The CSPRNG could not be seeded.
    #[error("Entropy source failed: {0}")]
    EntropySource(String),

    /// Root CA material could not be read or parsed.
    #[error("Root CA credential invalid: {0}")]
    RootCertParse(#[source] CredentialError),

    /// Device certificate could not be read or parsed.
    #[error("Device certificate invalid: {0}")]
    DeviceCertParse(#[source] CredentialError),

    /// Device private key could not be read or parsed.
    #[error("Device private key invalid: {0}")]
    PrivateKeyParse(#[source] CredentialError),

    /// The operating system refused to create a socket.
    #[error("Socket creation failed: {0}")]
    SocketCreateFailed(#[source] io::Error),

    /// The destination host did not resolve to any address.
    #[error("Host unknown: {host}")]
    HostUnknown {
        host: String,
        #[source]
        source: Option<io::Error>,
    },

    /// Every resolved address refused or timed out the TCP connect.
    #[error("TCP connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The connected socket could not be put into blocking mode.
    #[error("Connection setup failed: {0}")]
    Connection(#[source] io::Error),

    /// TLS setup or handshake failed.
    #[error("TLS connection failed: {0}")]
    SslConnection(SslFailure),

    /// Unrecoverable read fault; the session must be re-established.
    #[error("Read failed: {0}")]
    Read(String),

    /// Unrecoverable write fault; the session must be re-established.
    #[error("Write failed: {0}")]
    Write(String),

    /// The read deadline elapsed after `read` bytes were placed in the buffer.
    #[error("Read deadline elapsed after {read} bytes")]
    ReadTimeoutPartial { read: usize },

    /// The read deadline elapsed before any byte arrived.
    #[error("Read deadline elapsed with nothing to read")]
    NothingToRead,

    /// The write deadline elapsed after `written` bytes were accepted.
    #[error("Write deadline elapsed after {written} bytes")]
    WriteTimeout { written: usize },
}

/// Cause attached to [`TransportError::SslConnection`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SslFailure {
    /// The engine rejected its configuration (SNI name, credentials, protocol set).
    #[error("engine configuration rejected: {0}")]
    Configuration(String),

    /// The handshake aborted.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The server certificate chain did not verify.
    #[error("server certificate verification failed (flags {flags:#06x})")]
    CertificateVerification { flags: u32 },

    /// The caller's deadline elapsed mid-handshake.
    #[error("handshake did not complete before the deadline")]
    HandshakeTimedOut,
}

/// Fieldless view of [`TransportError`], one entry per failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NullArgument,
    EntropySourceError,
    RootCertParseError,
    DeviceCertParseError,
    PrivateKeyParseError,
    SocketCreateFailed,
    HostUnknown,
    ConnectFailed,
    ConnectionError,
    SslConnectionError,
    ReadError,
    WriteError,
    ReadTimeoutPartial,
    NothingToRead,
    WriteTimeout,
}

/// What a caller can reasonably do about an error.
///
/// This is classification only; timing and attempt limits belong to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Programming error in the caller; retrying cannot help.
    FixCaller,
    /// Material or configuration must change before another attempt.
    FixConfiguration,
    /// Transient network condition; retry the connect with backoff.
    RetryWithBackoff,
    /// Give up on this attempt; the local environment is broken.
    Abandon,
    /// Tear the session down and connect again.
    Reconnect,
    /// Issue the read again from the current buffer offset.
    RetryRead,
    /// Partial data was sent; the caller decides about the remainder.
    CallerDecides,
}

impl TransportError {
    /// Build the parse error matching the credential's role.
    pub fn credential(role: CredentialRole, source: CredentialError) -> Self {
        match role {
            CredentialRole::RootCa => Self::RootCertParse(source),
            CredentialRole::DeviceCert => Self::DeviceCertParse(source),
            CredentialRole::PrivateKey => Self::PrivateKeyParse(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NullArgument(_) => ErrorKind::NullArgument,
            Self::EntropySource(_) => ErrorKind::EntropySourceError,
            Self::RootCertParse(_) => ErrorKind::RootCertParseError,
            Self::DeviceCertParse(_) => ErrorKind::DeviceCertParseError,
            Self::PrivateKeyParse(_) => ErrorKind::PrivateKeyParseError,
            Self::SocketCreateFailed(_) => ErrorKind::SocketCreateFailed,
            Self::HostUnknown { .. } => ErrorKind::HostUnknown,
            Self::ConnectFailed { .. } => ErrorKind::ConnectFailed,
            Self::Connection(_) => ErrorKind::ConnectionError,
            Self::SslConnection(_) => ErrorKind::SslConnectionError,
            Self::Read(_) => ErrorKind::ReadError,
            Self::Write(_) => ErrorKind::WriteError,
            Self::ReadTimeoutPartial { .. } => ErrorKind::ReadTimeoutPartial,
            Self::NothingToRead => ErrorKind::NothingToRead,
            Self::WriteTimeout { .. } => ErrorKind::WriteTimeout,
        }
    }

    pub fn recovery(&self) -> Recovery {
        match self {
            Self::NullArgument(_) => Recovery::FixCaller,
            Self::EntropySource(_) | Self::Connection(_) => Recovery::Abandon,
            Self::RootCertParse(_) | Self::DeviceCertParse(_) | Self::PrivateKeyParse(_) => {
                Recovery::FixConfiguration
            }
            Self::HostUnknown { .. } => Recovery::FixConfiguration,
            Self::SocketCreateFailed(_) | Self::ConnectFailed { .. } => Recovery::RetryWithBackoff,
            Self::SslConnection(SslFailure::HandshakeTimedOut) => Recovery::RetryWithBackoff,
            Self::SslConnection(_) => Recovery::FixConfiguration,
            Self::Read(_) | Self::Write(_) => Recovery::Reconnect,
            Self::ReadTimeoutPartial { .. } | Self::NothingToRead => Recovery::RetryRead,
            Self::WriteTimeout { .. } => Recovery::CallerDecides,
        }
    }

    /// Bytes transferred before a deadline elapsed, if this is a timeout.
    pub fn partial_len(&self) -> Option<usize> {
        match self {
            Self::ReadTimeoutPartial { read } => Some(*read),
            Self::WriteTimeout { written } => Some(*written),
            Self::NothingToRead => Some(0),
            _ => None,
        }
    }
}
