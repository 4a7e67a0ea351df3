//! TCP socket setup.
//!
//! Resolution, socket creation and connect are separate steps so each failure
//! can be classified on its own: an unknown host is a configuration problem, a
//! refused connect is usually transient.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use thiserror::Error;

use super::error::TransportError;

/// Failures while opening the TCP connection.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("failed to create socket: {0}")]
    Create(#[source] io::Error),

    #[error("host {host} did not resolve")]
    HostUnknown {
        host: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

impl From<SocketError> for TransportError {
    fn from(err: SocketError) -> Self {
        match err {
            SocketError::Create(source) => TransportError::SocketCreateFailed(source),
            SocketError::HostUnknown { host, source } => TransportError::HostUnknown { host, source },
            SocketError::Connect { addr, source } => TransportError::ConnectFailed { addr, source },
        }
    }
}

/// Resolve `host:port` to every candidate address, in resolver order.
pub fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, SocketError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|source| SocketError::HostUnknown {
            host: host.to_string(),
            source: Some(source),
        })?
        .collect();

    if addrs.is_empty() {
        return Err(SocketError::HostUnknown {
            host: host.to_string(),
            source: None,
        });
    }
    Ok(addrs)
}

/// Connect to the first address of `host` that accepts within `timeout`.
///
/// Returns the last connect error when every address fails.
pub fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<Socket, SocketError> {
    let addrs = resolve(host, port)?;
    connect_any(host, &addrs, timeout, |addr| {
        Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
    })
}

/// Try `addrs` in order, creating each socket with `open`.
///
/// An address whose socket cannot be created (e.g. IPv6 on an IPv4-only
/// host) is skipped. `Create` is reported only when no socket could be
/// created at all.
fn connect_any<F>(
    host: &str,
    addrs: &[SocketAddr],
    timeout: Duration,
    mut open: F,
) -> Result<Socket, SocketError>
where
    F: FnMut(SocketAddr) -> io::Result<Socket>,
{
    let timeout = timeout.max(Duration::from_millis(1));
    let mut create_error = None;
    let mut connect_error = None;

    for &addr in addrs {
        let socket = match open(addr) {
            Ok(socket) => socket,
            Err(source) => {
                tracing::debug!(%addr, error = %source, "Socket creation failed");
                create_error = Some(SocketError::Create(source));
                continue;
            }
        };

        match socket.connect_timeout(&SockAddr::from(addr), timeout) {
            Ok(()) => {
                tracing::debug!(%addr, "TCP connected");
                return Ok(socket);
            }
            Err(source) => {
                tracing::debug!(%addr, error = %source, "TCP connect attempt failed");
                connect_error = Some(SocketError::Connect { addr, source });
            }
        }
    }

    Err(connect_error
        .or(create_error)
        .unwrap_or_else(|| SocketError::HostUnknown {
            host: host.to_string(),
            source: None,
        }))
}
