//! An established TLS session and its owned resources.

use super::credentials::ClientCredentials;
use super::engine::TlsEngine;

/// Exclusive owner of one engine (socket, TLS state) and the parsed credentials.
///
/// A session only exists once the handshake has completed; resources of a
/// failed attempt are dropped where the attempt fails.
pub struct TlsSession<E: TlsEngine> {
    engine: E,
    credentials: ClientCredentials,
    /// Timeout restored on the engine after every bounded call.
    configured_timeout_ms: u32,
    closed: bool,
    link_lost: bool,
}

impl<E: TlsEngine> TlsSession<E> {
    pub fn new(engine: E, credentials: ClientCredentials, configured_timeout_ms: u32) -> Self {
        Self {
            engine,
            credentials,
            configured_timeout_ms,
            closed: false,
            link_lost: false,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn configured_timeout_ms(&self) -> u32 {
        self.configured_timeout_ms
    }

    pub fn credentials(&self) -> &ClientCredentials {
        &self.credentials
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn mark_closed(&mut self) {
        self.closed = true;
    }

    /// Record that the peer closed or the link failed.
    pub fn mark_link_lost(&mut self) {
        self.link_lost = true;
    }

    /// Whether data can still flow in both directions.
    pub fn is_usable(&self) -> bool {
        !self.closed && !self.link_lost
    }

    /// Release everything in dependency order: socket, client certificate,
    /// CA certificates, private key, then the engine's TLS state.
    ///
    /// The engine's client configuration shares the trust anchors, so the
    /// CA store itself is freed when the engine drops.
    pub fn release(self) {
        let Self {
            mut engine,
            credentials,
            ..
        } = self;

        engine.shutdown_transport();

        let ClientCredentials {
            device_chain,
            trust_anchors,
            private_key,
        } = credentials;
        drop(device_chain);
        drop(trust_anchors);
        drop(private_key);

        drop(engine);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::Arc;

    use rustls::RootCertStore;

    use super::*;
    use crate::net::credentials::CredentialSource;
    use crate::net::engine::EngineError;

    /// Holds what a real engine's client configuration would hold.
    struct SharingEngine {
        _anchors: Arc<RootCertStore>,
        shutdowns: Rc<Cell<u32>>,
    }

    impl TlsEngine for SharingEngine {
        fn handshake(&mut self) -> Result<(), EngineError> {
            Ok(())
        }
        fn read(&mut self, _buf: &mut [u8]) -> Result<usize, EngineError> {
            Err(EngineError::WouldBlockRead)
        }
        fn write(&mut self, buf: &[u8]) -> Result<usize, EngineError> {
            Ok(buf.len())
        }
        fn read_timeout(&self) -> u32 {
            0
        }
        fn set_read_timeout(&mut self, _timeout_ms: u32) -> Result<(), EngineError> {
            Ok(())
        }
        fn verify_result(&self) -> u32 {
            0
        }
        fn close_notify(&mut self) -> Result<(), EngineError> {
            Ok(())
        }
        fn shutdown_transport(&mut self) {
            self.shutdowns.set(self.shutdowns.get() + 1);
        }
    }

    fn credentials() -> ClientCredentials {
        let device = rcgen::generate_simple_self_signed(vec!["device.local".to_string()]).unwrap();
        let cert = CredentialSource::Inline(device.cert.pem().into_bytes());
        let key = CredentialSource::Inline(device.key_pair.serialize_pem().into_bytes());
        ClientCredentials::load(&cert, &cert, &key).unwrap()
    }

    #[test]
    fn release_frees_trust_anchors_shared_with_the_engine() {
        let credentials = credentials();
        let anchors = Arc::downgrade(&credentials.trust_anchors);
        let shutdowns = Rc::new(Cell::new(0));
        let engine = SharingEngine {
            _anchors: Arc::clone(&credentials.trust_anchors),
            shutdowns: Rc::clone(&shutdowns),
        };
        let session = TlsSession::new(engine, credentials, 1_000);
        assert_eq!(anchors.strong_count(), 2);

        session.release();

        assert_eq!(shutdowns.get(), 1);
        assert!(anchors.upgrade().is_none());
    }
}
