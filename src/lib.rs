//! Client-side TLS transport for IoT protocol stacks.

pub mod config;
pub mod net;
pub mod observability;

pub use config::schema::TransportConfig;
pub use net::{
    ConnectionParameters, Countdown, ErrorKind, Network, NetworkInterface, Recovery, Timer,
    TlsNetwork, TransportError,
};
