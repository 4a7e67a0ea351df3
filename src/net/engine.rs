//! TLS engine boundary.
//!
//! The network interface drives connection setup through an [`EngineConnector`]
//! and the established channel through a [`TlsEngine`]. Engine statuses are
//! [`EngineError`] values; they are translated into
//! [`TransportError`](super::error::TransportError) by the interface and never
//! escape the `net` module.

use std::io;
use std::time::Duration;

use thiserror::Error;

use super::credentials::ClientCredentials;
use super::socket::SocketError;

/// Verify-result bits, X.509 "badcert" layout.
pub mod verify_flags {
    pub const EXPIRED: u32 = 0x01;
    pub const REVOKED: u32 = 0x02;
    pub const NAME_MISMATCH: u32 = 0x04;
    pub const NOT_TRUSTED: u32 = 0x08;
    pub const OTHER: u32 = 0x0100;
    pub const FUTURE: u32 = 0x0200;
    pub const KEY_USAGE: u32 = 0x0800;
    pub const BAD_KEY: u32 = 0x8000;
}

/// Status of a single engine call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Needs inbound records before it can progress; call again.
    #[error("would block on read")]
    WouldBlockRead,

    /// Needs to flush outbound records before it can progress; call again.
    #[error("would block on write")]
    WouldBlockWrite,

    /// The engine read timeout elapsed without data.
    #[error("engine read timed out")]
    Timeout,

    /// The peer closed the transport.
    #[error("connection closed by peer")]
    Closed,

    /// The server certificate chain failed verification.
    #[error("certificate verification failed (flags {flags:#06x})")]
    CertificateVerification { flags: u32 },

    /// Any other engine or transport fault.
    #[error("{0}")]
    Fatal(String),
}

impl EngineError {
    pub fn would_block(&self) -> bool {
        matches!(self, Self::WouldBlockRead | Self::WouldBlockWrite)
    }

    pub(crate) fn fatal(err: impl std::fmt::Display) -> Self {
        Self::Fatal(err.to_string())
    }
}

/// How strictly the server chain is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Verification failure aborts the handshake.
    Required,
    /// Verification failure is only recorded in the verify result.
    Optional,
}

impl AuthMode {
    pub fn for_verify_server(verify_server: bool) -> Self {
        if verify_server {
            Self::Required
        } else {
            Self::Optional
        }
    }
}

/// Engine configuration for one attempt.
#[derive(Debug)]
pub struct EngineSettings<'a> {
    /// SNI and certificate name.
    pub server_name: &'a str,
    pub auth_mode: AuthMode,
    pub credentials: &'a ClientCredentials,
    pub read_timeout_ms: u32,
}

/// Per-attempt setup primitives, in the order the interface calls them.
pub trait EngineConnector {
    type Transport;
    type Engine: TlsEngine;

    /// Seed (or verify) the engine's CSPRNG from its entropy source.
    fn seed_entropy(&mut self) -> Result<(), EngineError>;

    /// Resolve `host` and open a TCP connection within `timeout`.
    fn open_transport(
        &mut self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Self::Transport, SocketError>;

    /// Force the transport into blocking mode.
    fn set_blocking(&mut self, transport: &Self::Transport) -> io::Result<()>;

    /// Client role, stream transport, auth mode, credentials, read timeout,
    /// transport binding and SNI.
    fn configure(
        &mut self,
        transport: Self::Transport,
        settings: EngineSettings<'_>,
    ) -> Result<Self::Engine, EngineError>;
}

/// An engine bound to an open transport.
pub trait TlsEngine {
    /// Advance the handshake by one step. `Ok` once it is complete.
    fn handshake(&mut self) -> Result<(), EngineError>;

    /// Read decrypted bytes. `Ok(0)` means the peer closed the stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, EngineError>;

    /// Accept plaintext for sending; returns how much was taken.
    fn write(&mut self, buf: &[u8]) -> Result<usize, EngineError>;

    fn read_timeout(&self) -> u32;

    fn set_read_timeout(&mut self, timeout_ms: u32) -> Result<(), EngineError>;

    /// Bitmask of [`verify_flags`]; zero when the chain verified.
    fn verify_result(&self) -> u32;

    /// Queue and flush a close-notify alert.
    fn close_notify(&mut self) -> Result<(), EngineError>;

    /// Close the underlying socket. Safe to call more than once.
    fn shutdown_transport(&mut self);
}
