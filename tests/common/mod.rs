//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, ServerConnection, StreamOwned};

use tls_transport::net::engine::{AuthMode, EngineConnector, EngineError, EngineSettings, TlsEngine};
use tls_transport::net::{ConnectionParameters, NetworkInterface, SocketError, Timer};

// ---------------------------------------------------------------------------
// Timers
// ---------------------------------------------------------------------------

/// Timer that expires after a fixed number of `has_expired` checks.
pub struct StepTimer {
    checks_left: Cell<u32>,
    remaining_ms: u32,
}

impl StepTimer {
    pub fn never_expiring(remaining_ms: u32) -> Self {
        Self::expires_after(u32::MAX, remaining_ms)
    }

    pub fn expired() -> Self {
        Self::expires_after(0, 0)
    }

    pub fn expires_after(checks: u32, remaining_ms: u32) -> Self {
        Self {
            checks_left: Cell::new(checks),
            remaining_ms,
        }
    }
}

impl Timer for StepTimer {
    fn has_expired(&self) -> bool {
        let left = self.checks_left.get();
        if left == 0 {
            return true;
        }
        self.checks_left.set(left - 1);
        false
    }

    fn remaining_millis(&self) -> u32 {
        if self.checks_left.get() == 0 {
            0
        } else {
            self.remaining_ms
        }
    }
}

// ---------------------------------------------------------------------------
// Scripted engine
// ---------------------------------------------------------------------------

/// How the fake connector fails to open the TCP transport.
#[derive(Debug, Clone, Copy)]
pub enum OpenFailure {
    Create,
    HostUnknown,
    Refused,
}

/// Script and observations shared between a test and its fake engine.
#[derive(Default)]
pub struct FakeState {
    // script
    pub fail_entropy: bool,
    pub open_failure: Option<OpenFailure>,
    pub fail_blocking: bool,
    pub fail_configure: bool,
    pub handshake_script: VecDeque<Result<(), EngineError>>,
    /// Returned once the handshake script is empty; `None` completes it.
    pub handshake_stall: Option<EngineError>,
    pub reads: VecDeque<Result<Vec<u8>, EngineError>>,
    /// Bytes accepted before every further write would block.
    pub write_capacity: Option<usize>,
    pub write_error: Option<EngineError>,
    pub verify_flags: u32,
    pub close_script: VecDeque<Result<(), EngineError>>,

    // observations
    pub init_count: usize,
    pub free_count: usize,
    pub handshake_calls: usize,
    pub read_calls: usize,
    pub timeouts_set: Vec<u32>,
    pub written: Vec<u8>,
    pub close_calls: usize,
    pub shutdown_calls: usize,
    pub connect_timeouts: Vec<Duration>,
    pub server_names: Vec<String>,
    pub auth_modes: Vec<AuthMode>,
}

pub type Shared = Rc<RefCell<FakeState>>;

/// Counts as one acquired resource for its lifetime.
pub struct FakeTransport {
    state: Shared,
}

impl FakeTransport {
    fn new(state: &Shared) -> Self {
        state.borrow_mut().init_count += 1;
        Self {
            state: Rc::clone(state),
        }
    }
}

impl Drop for FakeTransport {
    fn drop(&mut self) {
        self.state.borrow_mut().free_count += 1;
    }
}

pub struct FakeEngine {
    state: Shared,
    read_timeout_ms: u32,
    _transport: FakeTransport,
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        self.state.borrow_mut().free_count += 1;
    }
}

impl TlsEngine for FakeEngine {
    fn handshake(&mut self) -> Result<(), EngineError> {
        let mut state = self.state.borrow_mut();
        state.handshake_calls += 1;
        match state.handshake_script.pop_front() {
            Some(step) => step,
            None => match state.handshake_stall.clone() {
                Some(err) => Err(err),
                None => Ok(()),
            },
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, EngineError> {
        let mut state = self.state.borrow_mut();
        state.read_calls += 1;
        match state.reads.pop_front() {
            Some(Ok(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    state.reads.push_front(Ok(data.split_off(n)));
                }
                Ok(n)
            }
            Some(Err(err)) => Err(err),
            None => Err(EngineError::WouldBlockRead),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, EngineError> {
        let mut state = self.state.borrow_mut();
        if let Some(err) = state.write_error.clone() {
            return Err(err);
        }
        let room = match state.write_capacity {
            Some(capacity) => capacity.saturating_sub(state.written.len()),
            None => usize::MAX,
        };
        if room == 0 {
            return Err(EngineError::WouldBlockWrite);
        }
        let n = buf.len().min(room);
        state.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn read_timeout(&self) -> u32 {
        self.read_timeout_ms
    }

    fn set_read_timeout(&mut self, timeout_ms: u32) -> Result<(), EngineError> {
        self.state.borrow_mut().timeouts_set.push(timeout_ms);
        self.read_timeout_ms = timeout_ms;
        Ok(())
    }

    fn verify_result(&self) -> u32 {
        self.state.borrow().verify_flags
    }

    fn close_notify(&mut self) -> Result<(), EngineError> {
        let mut state = self.state.borrow_mut();
        state.close_calls += 1;
        state.close_script.pop_front().unwrap_or(Ok(()))
    }

    fn shutdown_transport(&mut self) {
        self.state.borrow_mut().shutdown_calls += 1;
    }
}

#[derive(Default)]
pub struct FakeConnector {
    state: Shared,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle that outlives the interface owning this connector.
    pub fn state(&self) -> Shared {
        Rc::clone(&self.state)
    }
}

impl EngineConnector for FakeConnector {
    type Transport = FakeTransport;
    type Engine = FakeEngine;

    fn seed_entropy(&mut self) -> Result<(), EngineError> {
        if self.state.borrow().fail_entropy {
            return Err(EngineError::Fatal("no entropy".into()));
        }
        Ok(())
    }

    fn open_transport(
        &mut self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<FakeTransport, SocketError> {
        let failure = {
            let mut state = self.state.borrow_mut();
            state.connect_timeouts.push(timeout);
            state.open_failure
        };
        match failure {
            None => Ok(FakeTransport::new(&self.state)),
            Some(OpenFailure::Create) => Err(SocketError::Create(io::Error::other("no descriptors"))),
            Some(OpenFailure::HostUnknown) => Err(SocketError::HostUnknown {
                host: host.to_string(),
                source: None,
            }),
            Some(OpenFailure::Refused) => Err(SocketError::Connect {
                addr: SocketAddr::from(([127, 0, 0, 1], port)),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            }),
        }
    }

    fn set_blocking(&mut self, _transport: &FakeTransport) -> io::Result<()> {
        if self.state.borrow().fail_blocking {
            return Err(io::Error::other("fcntl failed"));
        }
        Ok(())
    }

    fn configure(
        &mut self,
        transport: FakeTransport,
        settings: EngineSettings<'_>,
    ) -> Result<FakeEngine, EngineError> {
        {
            let mut state = self.state.borrow_mut();
            state.server_names.push(settings.server_name.to_string());
            state.auth_modes.push(settings.auth_mode);
            if state.fail_configure {
                return Err(EngineError::Fatal("bad engine configuration".into()));
            }
            state.init_count += 1;
            state.timeouts_set.push(settings.read_timeout_ms);
        }
        Ok(FakeEngine {
            state: Rc::clone(&self.state),
            read_timeout_ms: settings.read_timeout_ms,
            _transport: transport,
        })
    }
}

/// Interface over a fresh fake connector, plus the handle to its script.
pub fn fake_network() -> (NetworkInterface<FakeConnector>, Shared) {
    let connector = FakeConnector::new();
    let state = connector.state();
    (NetworkInterface::new(connector), state)
}

// ---------------------------------------------------------------------------
// Test PKI
// ---------------------------------------------------------------------------

/// CA, server leaf for `localhost` and a device (client) leaf, all in memory.
pub struct TestPki {
    pub ca_pem: String,
    pub client_cert_pem: String,
    pub client_key_pem: String,
    ca_der: CertificateDer<'static>,
    server_chain: Vec<CertificateDer<'static>>,
    server_key_der: Vec<u8>,
}

fn ca(name: &str) -> (rcgen::Certificate, KeyPair) {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.distinguished_name.push(DnType::CommonName, name);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    let cert = params.self_signed(&key).unwrap();
    (cert, key)
}

fn leaf(
    names: Vec<String>,
    issuer: &rcgen::Certificate,
    issuer_key: &KeyPair,
) -> (rcgen::Certificate, KeyPair) {
    let key = KeyPair::generate().unwrap();
    let cert = CertificateParams::new(names)
        .unwrap()
        .signed_by(&key, issuer, issuer_key)
        .unwrap();
    (cert, key)
}

impl TestPki {
    pub fn generate() -> Self {
        let (ca_cert, ca_key) = ca("Transport Test Root");
        let (server_cert, server_key) = leaf(vec!["localhost".into()], &ca_cert, &ca_key);
        let (client_cert, client_key) = leaf(vec!["device-001".into()], &ca_cert, &ca_key);

        Self {
            ca_pem: ca_cert.pem(),
            client_cert_pem: client_cert.pem(),
            client_key_pem: client_key.serialize_pem(),
            ca_der: ca_cert.der().clone(),
            server_chain: vec![server_cert.der().clone(), ca_cert.der().clone()],
            server_key_der: server_key.serialize_der(),
        }
    }

    /// PEM of an unrelated CA the server chain does not lead to.
    pub fn foreign_ca_pem() -> String {
        ca("Unrelated Root").0.pem()
    }

    /// Parameters with inline credentials.
    pub fn params(&self, host: &str, port: u16) -> ConnectionParameters {
        ConnectionParameters::new(
            self.ca_pem.as_str(),
            self.client_cert_pem.as_str(),
            self.client_key_pem.as_str(),
            host,
            port,
        )
    }

    /// Write CA, device certificate and key to files; returns their paths.
    pub fn write_files(&self) -> (PathBuf, PathBuf, PathBuf) {
        let dir = scratch_dir();
        let root = dir.join("root-ca.pem");
        let cert = dir.join("device.pem");
        let key = dir.join("device.key");
        std::fs::write(&root, &self.ca_pem).unwrap();
        std::fs::write(&cert, &self.client_cert_pem).unwrap();
        std::fs::write(&key, &self.client_key_pem).unwrap();
        (root, cert, key)
    }

    /// Server configuration requiring a client certificate from this PKI.
    pub fn server_config(&self) -> Arc<ServerConfig> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut roots = RootCertStore::empty();
        roots.add(self.ca_der.clone()).unwrap();
        let client_verifier =
            WebPkiClientVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
                .build()
                .unwrap();

        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.server_key_der.clone()));
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_client_cert_verifier(client_verifier)
            .with_single_cert(self.server_chain.clone(), key)
            .unwrap();
        Arc::new(config)
    }
}

fn scratch_dir() -> PathBuf {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let dir = std::env::temp_dir().join(format!(
        "tls-transport-test-{}-{}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::SeqCst)
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

// ---------------------------------------------------------------------------
// Loopback servers
// ---------------------------------------------------------------------------

/// TLS echo server for a single connection on 127.0.0.1.
///
/// The thread ends when the client closes or the handshake fails; it returns
/// everything it received.
pub fn start_echo_server(config: Arc<ServerConfig>) -> (u16, JoinHandle<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let mut received = Vec::new();
        let Ok((tcp, _)) = listener.accept() else {
            return received;
        };
        tcp.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        let Ok(conn) = ServerConnection::new(config) else {
            return received;
        };
        let mut stream = StreamOwned::new(conn, tcp);

        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    received.extend_from_slice(&buf[..n]);
                    if stream.write_all(&buf[..n]).is_err() {
                        break;
                    }
                }
            }
        }
        received
    });

    (port, handle)
}

/// TLS server that stops reading after the handshake until told how many
/// application bytes to expect.
///
/// Once it has received that many bytes it answers with `K` and waits for the
/// client to close. The thread returns the number of bytes it received.
pub fn start_gated_server(config: Arc<ServerConfig>) -> (u16, Sender<usize>, JoinHandle<usize>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (gate, expected) = mpsc::channel();

    let handle = thread::spawn(move || {
        let Ok((mut tcp, _)) = listener.accept() else {
            return 0;
        };
        tcp.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        let Ok(mut conn) = ServerConnection::new(config) else {
            return 0;
        };
        while conn.is_handshaking() {
            if conn.complete_io(&mut tcp).is_err() {
                return 0;
            }
        }

        let Ok(expected) = expected.recv() else {
            return 0;
        };
        let mut stream = StreamOwned::new(conn, tcp);
        let mut received = 0;
        let mut buf = vec![0u8; 64 * 1024];
        while received < expected {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => return received,
                Ok(n) => received += n,
            }
        }
        if stream.write_all(b"K").is_err() {
            return received;
        }
        while let Ok(n) = stream.read(&mut buf) {
            if n == 0 {
                break;
            }
        }
        received
    });

    (port, gate, handle)
}

/// Listener that completes TCP connects but never answers the TLS handshake.
pub fn silent_listener() -> (u16, TcpListener) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (port, listener)
}

/// A port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
