//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files. Every
//! section has defaults so a minimal file only names the endpoint and
//! credentials.

use serde::{Deserialize, Serialize};

use crate::net::params::{ConnectionParameters, DEFAULT_TIMEOUT_MS};

/// Root configuration for the transport.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Remote endpoint (broker) to connect to.
    pub endpoint: EndpointConfig,

    /// Credential references: a leading `/` is a path, anything else inline PEM.
    pub credentials: CredentialsConfig,

    /// Engine and operation timeouts.
    pub timeouts: TimeoutConfig,

    /// Require the server certificate chain to verify.
    pub verify_server: bool,

    /// Logging settings.
    pub observability: ObservabilityConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            credentials: CredentialsConfig::default(),
            timeouts: TimeoutConfig::default(),
            verify_server: true,
            observability: ObservabilityConfig::default(),
        }
    }
}

impl TransportConfig {
    /// Build the parameters for one connection attempt.
    pub fn connection_parameters(&self) -> ConnectionParameters {
        ConnectionParameters::new(
            self.credentials.root_ca.as_str(),
            self.credentials.device_cert.as_str(),
            self.credentials.device_private_key.as_str(),
            self.endpoint.host.clone(),
            self.endpoint.port,
        )
        .with_timeout_ms(self.timeouts.read_ms)
        .with_verify_server(self.verify_server)
    }
}

/// Remote endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Hostname; also used for SNI and certificate name checks.
    pub host: String,

    /// TCP port (8883 for MQTT over TLS).
    pub port: u16,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8883,
        }
    }
}

/// Credential references.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub root_ca: String,
    pub device_cert: String,
    pub device_private_key: String,
}

/// Timeout configuration in milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Engine read timeout (upper bound of each blocking socket read).
    pub read_ms: u32,

    /// Deadline given to each connect/read/write call by the CLI.
    pub operation_ms: u32,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read_ms: DEFAULT_TIMEOUT_MS,
            operation_ms: 20_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,

    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "tls_transport=info".to_string(),
            log_format: LogFormat::Compact,
        }
    }
}
