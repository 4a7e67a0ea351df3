//! The network capability upper protocol layers consume.
//!
//! `NetworkInterface` composes credential resolution, TCP setup and a TLS
//! engine behind the [`Network`] trait. All calls on one instance must be
//! serialized by the caller; there is no internal locking.

use std::time::Duration;

use tracing::Span;

use super::connection::{ConnectionId, ConnectionState};
use super::credentials::ClientCredentials;
use super::engine::{AuthMode, EngineConnector, EngineError, EngineSettings, TlsEngine};
use super::error::{SslFailure, TransportError};
use super::params::ConnectionParameters;
use super::session::TlsSession;
use super::timer::{bounded_timeout, Countdown, Timer};

/// Byte-stream capability offered to protocol layers (e.g. an MQTT client).
pub trait Network {
    /// Establish a TLS session. `None` reuses the previously supplied parameters.
    ///
    /// The TCP connect and every handshake step are bounded by `timer`.
    fn connect(
        &mut self,
        params: Option<ConnectionParameters>,
        timer: &dyn Timer,
    ) -> Result<(), TransportError>;

    /// Fill `buf` completely or report how far it got before `timer` expired.
    fn read(&mut self, buf: &mut [u8], timer: &dyn Timer) -> Result<usize, TransportError>;

    /// Send all of `buf` or report how much was accepted before `timer` expired.
    fn write(&mut self, buf: &[u8], timer: &dyn Timer) -> Result<usize, TransportError>;

    /// True while the session is established and no I/O has seen the link fail.
    fn is_connected(&self) -> bool;

    /// Best-effort close-notify. Calling it again is a no-op.
    fn disconnect(&mut self);

    /// Release every resource of the current session. Idempotent.
    fn destroy(&mut self);
}

/// Install a narrowed read timeout for one engine call, then restore the configured one.
fn with_bounded_timeout<E, T>(
    engine: &mut E,
    configured_ms: u32,
    timer: &dyn Timer,
    op: impl FnOnce(&mut E) -> Result<T, EngineError>,
) -> Result<T, EngineError>
where
    E: TlsEngine,
{
    engine.set_read_timeout(bounded_timeout(configured_ms, timer.remaining_millis()))?;
    let result = op(engine);
    let restored = engine.set_read_timeout(configured_ms);
    let value = result?;
    restored?;
    Ok(value)
}

fn is_retryable(err: &EngineError) -> bool {
    err.would_block() || *err == EngineError::Timeout
}

fn drive_handshake<E: TlsEngine>(
    engine: &mut E,
    configured_ms: u32,
    timer: &dyn Timer,
) -> Result<(), TransportError> {
    loop {
        match with_bounded_timeout(engine, configured_ms, timer, |engine| engine.handshake()) {
            Ok(()) => return Ok(()),
            Err(err) if is_retryable(&err) => {
                if timer.has_expired() {
                    return Err(TransportError::SslConnection(SslFailure::HandshakeTimedOut));
                }
            }
            Err(EngineError::CertificateVerification { flags }) => {
                return Err(TransportError::SslConnection(
                    SslFailure::CertificateVerification { flags },
                ));
            }
            Err(err) => {
                return Err(TransportError::SslConnection(SslFailure::Handshake(
                    err.to_string(),
                )));
            }
        }
    }
}

/// TLS-backed [`Network`] implementation.
pub struct NetworkInterface<C: EngineConnector> {
    connector: C,
    params: Option<ConnectionParameters>,
    session: Option<TlsSession<C::Engine>>,
    state: ConnectionState,
    id: ConnectionId,
    span: Span,
}

impl<C: EngineConnector> NetworkInterface<C> {
    pub fn new(connector: C) -> Self {
        let id = ConnectionId::new();
        let span = tracing::info_span!(
            "tls_transport",
            conn = %id,
            host = tracing::field::Empty,
            port = tracing::field::Empty,
        );
        Self {
            connector,
            params: None,
            session: None,
            state: ConnectionState::Uninitialized,
            id,
            span,
        }
    }

    /// Emit this instance's events inside `span` instead of the default one.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn parameters(&self) -> Option<&ConnectionParameters> {
        self.params.as_ref()
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Verify-result bitmask of the current session, if any.
    pub fn verify_result(&self) -> Option<u32> {
        self.session.as_ref().map(|session| session.engine().verify_result())
    }

    fn usable_session(&mut self) -> Option<&mut TlsSession<C::Engine>> {
        if !self.state.is_established() {
            return None;
        }
        self.session.as_mut().filter(|session| session.is_usable())
    }

    /// Steps 1-10 of one attempt. Anything acquired is dropped on failure.
    fn establish(
        &mut self,
        params: &ConnectionParameters,
        timer: &dyn Timer,
    ) -> Result<TlsSession<C::Engine>, TransportError> {
        self.state.advance(ConnectionState::TcpConnecting);

        self.connector
            .seed_entropy()
            .map_err(|err| TransportError::EntropySource(err.to_string()))?;

        let credentials = ClientCredentials::load(
            &params.root_ca,
            &params.device_cert,
            &params.device_private_key,
        )
        .map_err(|(role, err)| TransportError::credential(role, err))?;

        let connect_timeout = Duration::from_millis(u64::from(bounded_timeout(
            params.timeout_ms,
            timer.remaining_millis(),
        )));
        let transport = self.connector.open_transport(
            &params.destination_host,
            params.destination_port,
            connect_timeout,
        )?;
        self.connector
            .set_blocking(&transport)
            .map_err(TransportError::Connection)?;
        self.state.advance(ConnectionState::TcpConnected);

        let settings = EngineSettings {
            server_name: &params.destination_host,
            auth_mode: AuthMode::for_verify_server(params.verify_server),
            credentials: &credentials,
            read_timeout_ms: params.timeout_ms,
        };
        let mut engine = self
            .connector
            .configure(transport, settings)
            .map_err(|err| TransportError::SslConnection(SslFailure::Configuration(err.to_string())))?;

        self.state.advance(ConnectionState::TlsHandshaking);
        tracing::debug!("Performing TLS handshake");
        drive_handshake(&mut engine, params.timeout_ms, timer)?;

        let flags = engine.verify_result();
        if flags != 0 {
            if params.verify_server {
                return Err(TransportError::SslConnection(
                    SslFailure::CertificateVerification { flags },
                ));
            }
            tracing::warn!(
                flags = %format!("{flags:#06x}"),
                "Server certificate did not verify; continuing because verification is disabled"
            );
        }

        Ok(TlsSession::new(engine, credentials, params.timeout_ms))
    }

    fn release_session(&mut self) {
        if let Some(session) = self.session.take() {
            if !session.is_closed() {
                tracing::debug!("Releasing a session that was not disconnected");
            }
            session.release();
            tracing::debug!("Session resources released");
        }
    }
}

impl<C: EngineConnector> Network for NetworkInterface<C> {
    fn connect(
        &mut self,
        params: Option<ConnectionParameters>,
        timer: &dyn Timer,
    ) -> Result<(), TransportError> {
        let span = self.span.clone();
        let _enter = span.enter();

        let params = match params {
            Some(params) => params,
            None => self
                .params
                .clone()
                .ok_or(TransportError::NullArgument("connection parameters"))?,
        };
        if params.destination_host.is_empty() {
            return Err(TransportError::NullArgument("destination host"));
        }

        self.span.record("host", params.destination_host.as_str());
        self.span.record("port", params.destination_port);

        // At most one live session per interface.
        self.release_session();
        self.params = Some(params.clone());
        self.state.advance(ConnectionState::ParamsSet);

        tracing::debug!(
            timeout_ms = params.timeout_ms,
            verify_server = params.verify_server,
            "Connecting"
        );

        match self.establish(&params, timer) {
            Ok(session) => {
                self.session = Some(session);
                self.state.advance(ConnectionState::Established);
                tracing::info!("TLS session established");
                Ok(())
            }
            Err(err) => {
                self.state.advance(ConnectionState::Failed);
                tracing::warn!(error = %err, kind = ?err.kind(), "Connection attempt failed");
                Err(err)
            }
        }
    }

    fn read(&mut self, buf: &mut [u8], timer: &dyn Timer) -> Result<usize, TransportError> {
        let span = self.span.clone();
        let _enter = span.enter();

        let session = self
            .usable_session()
            .ok_or_else(|| TransportError::Read("no established session".into()))?;
        let configured_ms = session.configured_timeout_ms();
        let mut total = 0;

        while total < buf.len() {
            let remaining = &mut buf[total..];
            match with_bounded_timeout(session.engine_mut(), configured_ms, timer, |engine| {
                engine.read(remaining)
            }) {
                Ok(0) => {
                    session.mark_link_lost();
                    return Err(TransportError::Read(EngineError::Closed.to_string()));
                }
                Ok(n) => total += n,
                Err(err) if is_retryable(&err) => {}
                Err(err) => {
                    session.mark_link_lost();
                    tracing::debug!(error = %err, received = total, "Read aborted");
                    return Err(TransportError::Read(err.to_string()));
                }
            }

            if timer.has_expired() {
                break;
            }
        }

        if total == buf.len() {
            Ok(total)
        } else if total == 0 {
            Err(TransportError::NothingToRead)
        } else {
            tracing::trace!(received = total, requested = buf.len(), "Partial read");
            Err(TransportError::ReadTimeoutPartial { read: total })
        }
    }

    fn write(&mut self, buf: &[u8], timer: &dyn Timer) -> Result<usize, TransportError> {
        let span = self.span.clone();
        let _enter = span.enter();

        let session = self
            .usable_session()
            .ok_or_else(|| TransportError::Write("no established session".into()))?;
        let mut written = 0;
        let mut failure = None;

        while written < buf.len() && !timer.has_expired() {
            match session.engine_mut().write(&buf[written..]) {
                Ok(n) => written += n,
                Err(err) if err.would_block() => {}
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        if let Some(err) = failure {
            // Not torn down here; the next operation reports the dead link.
            session.mark_link_lost();
            tracing::debug!(error = %err, sent = written, "Write aborted");
            return Err(TransportError::Write(err.to_string()));
        }
        if timer.has_expired() && written != buf.len() {
            return Err(TransportError::WriteTimeout { written });
        }
        Ok(written)
    }

    fn is_connected(&self) -> bool {
        self.state.is_established()
            && self
                .session
                .as_ref()
                .is_some_and(|session| session.is_usable())
    }

    fn disconnect(&mut self) {
        let span = self.span.clone();
        let _enter = span.enter();

        let Some(session) = self.session.as_mut() else {
            tracing::trace!("Disconnect without a session");
            return;
        };
        if session.is_closed() {
            tracing::trace!("Session already disconnected");
            return;
        }

        let deadline = Countdown::from_millis(session.configured_timeout_ms());
        loop {
            match session.engine_mut().close_notify() {
                Ok(()) => break,
                Err(EngineError::WouldBlockWrite) if !deadline.has_expired() => {}
                // A reset connection needs no graceful closure.
                Err(err) => {
                    tracing::debug!(error = %err, "Close-notify not delivered");
                    break;
                }
            }
        }

        session.mark_closed();
        self.state.advance(ConnectionState::Disconnected);
        tracing::info!("Disconnected");
    }

    fn destroy(&mut self) {
        let span = self.span.clone();
        let _enter = span.enter();

        self.release_session();
        let next = if self.params.is_some() {
            ConnectionState::ParamsSet
        } else {
            ConnectionState::Uninitialized
        };
        if self.state != next {
            self.state.advance(next);
        }
    }
}

impl<C: EngineConnector> Drop for NetworkInterface<C> {
    fn drop(&mut self) {
        if self.session.is_some() {
            self.destroy();
        }
    }
}

impl<C: EngineConnector> std::fmt::Debug for NetworkInterface<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkInterface")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("params", &self.params)
            .field("has_session", &self.session.is_some())
            .finish()
    }
}
