//! Per-attempt connection parameters.

use super::credentials::CredentialSource;

/// Default engine read timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u32 = 10_000;

/// Everything one connection attempt needs.
///
/// Supplied to `connect`; a later `connect(None)` reuses the stored copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
    pub root_ca: CredentialSource,
    pub device_cert: CredentialSource,
    pub device_private_key: CredentialSource,
    pub destination_host: String,
    pub destination_port: u16,
    /// Engine read timeout; also bounds socket writes and close-notify.
    pub timeout_ms: u32,
    /// Require the server chain to verify against `root_ca`.
    pub verify_server: bool,
}

impl ConnectionParameters {
    /// Parameters with the default timeout and server verification on.
    pub fn new(
        root_ca: impl Into<CredentialSource>,
        device_cert: impl Into<CredentialSource>,
        device_private_key: impl Into<CredentialSource>,
        destination_host: impl Into<String>,
        destination_port: u16,
    ) -> Self {
        Self {
            root_ca: root_ca.into(),
            device_cert: device_cert.into(),
            device_private_key: device_private_key.into(),
            destination_host: destination_host.into(),
            destination_port,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            verify_server: true,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_verify_server(mut self, verify_server: bool) -> Self {
        self.verify_server = verify_server;
        self
    }
}
