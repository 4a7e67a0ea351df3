//! rustls-backed TLS engine.
//!
//! The engine drives a `rustls::ClientConnection` by hand over a blocking
//! `TcpStream`: each engine call performs at most one blocking socket read,
//! bounded by the socket read timeout, so callers keep control of deadlines.
//!
//! # Verification
//! The webpki verifier is wrapped in a reporting layer that logs the chain it
//! was given and ORs the failure cause into the verify-result bitmask. With
//! [`AuthMode::Optional`] the failure is recorded but does not abort the
//! handshake; with [`AuthMode::Required`] it does.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, ClientConnection, DigitallySignedStruct, SignatureScheme};
use socket2::Socket;

use super::engine::{
    verify_flags, AuthMode, EngineConnector, EngineError, EngineSettings, TlsEngine,
};
use super::socket::{self, SocketError};

/// Map a certificate failure to its verify-result bit.
///
/// The verifier reports most causes through their `*Context` forms.
pub fn certificate_flags(err: &CertificateError) -> u32 {
    match err {
        CertificateError::Expired | CertificateError::ExpiredContext { .. } => verify_flags::EXPIRED,
        CertificateError::NotValidYet | CertificateError::NotValidYetContext { .. } => {
            verify_flags::FUTURE
        }
        CertificateError::Revoked => verify_flags::REVOKED,
        CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. } => {
            verify_flags::NAME_MISMATCH
        }
        CertificateError::UnknownIssuer => verify_flags::NOT_TRUSTED,
        CertificateError::InvalidPurpose | CertificateError::InvalidPurposeContext { .. } => {
            verify_flags::KEY_USAGE
        }
        CertificateError::BadSignature => verify_flags::BAD_KEY,
        _ => verify_flags::OTHER,
    }
}

fn is_would_block(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

fn io_fault(err: io::Error) -> EngineError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => EngineError::Closed,
        _ => EngineError::fatal(err),
    }
}

fn socket_timeout(ms: u32) -> Option<Duration> {
    Some(Duration::from_millis(u64::from(ms.max(1))))
}

/// Reports chain details and records failures; the auth mode decides the outcome.
#[derive(Debug)]
struct ChainReporter {
    inner: Arc<WebPkiServerVerifier>,
    auth_mode: AuthMode,
    verify_result: Arc<AtomicU32>,
}

impl ServerCertVerifier for ChainReporter {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        tracing::debug!(
            ?server_name,
            end_entity_len = end_entity.len(),
            intermediates = intermediates.len(),
            "Verifying server certificate chain"
        );

        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Ok(verified) => Ok(verified),
            Err(rustls::Error::InvalidCertificate(cause)) => {
                let flags = certificate_flags(&cause);
                self.verify_result.fetch_or(flags, Ordering::SeqCst);
                tracing::debug!(flags, ?cause, "Server chain did not verify");

                match self.auth_mode {
                    AuthMode::Required => Err(rustls::Error::InvalidCertificate(cause)),
                    AuthMode::Optional => Ok(ServerCertVerified::assertion()),
                }
            }
            Err(other) => Err(other),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Builds [`RustlsEngine`]s over socket2 TCP sockets.
#[derive(Debug, Clone)]
pub struct RustlsConnector {
    provider: Arc<CryptoProvider>,
}

impl RustlsConnector {
    /// Connector using the ring crypto provider.
    pub fn new() -> Self {
        Self::with_provider(Arc::new(rustls::crypto::ring::default_provider()))
    }

    pub fn with_provider(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl Default for RustlsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConnector for RustlsConnector {
    type Transport = Socket;
    type Engine = RustlsEngine;

    fn seed_entropy(&mut self) -> Result<(), EngineError> {
        // The provider draws from the OS source; a failed draw means it is unusable.
        let mut seed = [0u8; 32];
        self.provider
            .secure_random
            .fill(&mut seed)
            .map_err(|_| EngineError::Fatal("entropy source returned no data".into()))
    }

    fn open_transport(
        &mut self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Socket, SocketError> {
        socket::connect_tcp(host, port, timeout)
    }

    fn set_blocking(&mut self, transport: &Socket) -> io::Result<()> {
        transport.set_nonblocking(false)
    }

    fn configure(
        &mut self,
        transport: Socket,
        settings: EngineSettings<'_>,
    ) -> Result<RustlsEngine, EngineError> {
        let verify_result = Arc::new(AtomicU32::new(0));
        let webpki = WebPkiServerVerifier::builder_with_provider(
            Arc::clone(&settings.credentials.trust_anchors),
            Arc::clone(&self.provider),
        )
        .build()
        .map_err(EngineError::fatal)?;

        let verifier = Arc::new(ChainReporter {
            inner: webpki,
            auth_mode: settings.auth_mode,
            verify_result: Arc::clone(&verify_result),
        });

        let config = ClientConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_safe_default_protocol_versions()
            .map_err(EngineError::fatal)?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_client_auth_cert(
                settings.credentials.device_chain.clone(),
                settings.credentials.private_key.clone_key(),
            )
            .map_err(EngineError::fatal)?;

        let server_name =
            ServerName::try_from(settings.server_name.to_string()).map_err(EngineError::fatal)?;
        let conn = ClientConnection::new(Arc::new(config), server_name).map_err(EngineError::fatal)?;

        let stream = TcpStream::from(transport);
        stream
            .set_write_timeout(socket_timeout(settings.read_timeout_ms))
            .map_err(EngineError::fatal)?;

        let mut engine = RustlsEngine {
            stream,
            conn,
            verify_result,
            read_timeout_ms: settings.read_timeout_ms,
            close_sent: false,
            transport_closed: false,
        };
        engine.set_read_timeout(settings.read_timeout_ms)?;
        Ok(engine)
    }
}

/// A rustls client connection bound to a blocking TCP stream.
///
/// Field order is drop order: socket first, then TLS session and its config.
pub struct RustlsEngine {
    stream: TcpStream,
    conn: ClientConnection,
    verify_result: Arc<AtomicU32>,
    read_timeout_ms: u32,
    close_sent: bool,
    transport_closed: bool,
}

impl RustlsEngine {
    fn classify(&self, err: rustls::Error) -> EngineError {
        match err {
            rustls::Error::InvalidCertificate(cause) => EngineError::CertificateVerification {
                flags: self.verify_result.load(Ordering::SeqCst) | certificate_flags(&cause),
            },
            other => EngineError::fatal(other),
        }
    }

    /// Write every pending TLS record.
    fn flush_records(&mut self) -> Result<(), EngineError> {
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut self.stream) {
                Ok(_) => {}
                Err(err) if is_would_block(&err) => return Err(EngineError::WouldBlockWrite),
                Err(err) => return Err(io_fault(err)),
            }
        }
        Ok(())
    }

    /// One blocking socket read, then record processing.
    fn pull_records(&mut self) -> Result<(), EngineError> {
        match self.conn.read_tls(&mut self.stream) {
            Ok(0) => return Err(EngineError::Closed),
            Ok(_) => {}
            Err(err) if is_would_block(&err) => return Err(EngineError::Timeout),
            Err(err) => return Err(io_fault(err)),
        }

        if let Err(err) = self.conn.process_new_packets() {
            // Send the queued alert if the socket still takes it.
            let _ = self.conn.write_tls(&mut self.stream);
            return Err(self.classify(err));
        }
        Ok(())
    }

    fn take_plaintext(&mut self, buf: &mut [u8]) -> Result<Option<usize>, EngineError> {
        match self.conn.reader().read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(io_fault(err)),
        }
    }
}

impl TlsEngine for RustlsEngine {
    fn handshake(&mut self) -> Result<(), EngineError> {
        self.flush_records()?;
        if !self.conn.is_handshaking() {
            return Ok(());
        }

        self.pull_records()?;
        if self.conn.wants_write() {
            Err(EngineError::WouldBlockWrite)
        } else if self.conn.is_handshaking() {
            Err(EngineError::WouldBlockRead)
        } else {
            Ok(())
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, EngineError> {
        if let Some(n) = self.take_plaintext(buf)? {
            return Ok(n);
        }

        // Records left queued by a timed-out write go out before blocking on
        // a read the peer may only answer once it has them.
        match self.flush_records() {
            Ok(()) | Err(EngineError::WouldBlockWrite) => {}
            Err(err) => return Err(err),
        }

        self.pull_records()?;
        // Post-handshake messages (key updates) may need an answer.
        match self.flush_records() {
            Ok(()) | Err(EngineError::WouldBlockWrite) => {}
            Err(err) => return Err(err),
        }

        self.take_plaintext(buf)?.ok_or(EngineError::WouldBlockRead)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, EngineError> {
        let accepted = self.conn.writer().write(buf).map_err(io_fault)?;

        match self.flush_records() {
            Ok(()) => {}
            // Accepted bytes stay queued and go out on the next flush.
            Err(EngineError::WouldBlockWrite) if accepted > 0 => {}
            Err(err) => return Err(err),
        }

        if accepted == 0 && !buf.is_empty() {
            return Err(EngineError::WouldBlockWrite);
        }
        Ok(accepted)
    }

    fn read_timeout(&self) -> u32 {
        self.read_timeout_ms
    }

    fn set_read_timeout(&mut self, timeout_ms: u32) -> Result<(), EngineError> {
        self.stream
            .set_read_timeout(socket_timeout(timeout_ms))
            .map_err(EngineError::fatal)?;
        self.read_timeout_ms = timeout_ms;
        Ok(())
    }

    fn verify_result(&self) -> u32 {
        self.verify_result.load(Ordering::SeqCst)
    }

    fn close_notify(&mut self) -> Result<(), EngineError> {
        if self.transport_closed {
            return Err(EngineError::Closed);
        }
        if !self.close_sent {
            self.conn.send_close_notify();
            self.close_sent = true;
        }
        self.flush_records()
    }

    fn shutdown_transport(&mut self) {
        if !self.transport_closed {
            let _ = self.stream.shutdown(Shutdown::Both);
            self.transport_closed = true;
        }
    }
}
