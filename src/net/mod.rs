//! Secure transport subsystem.
//!
//! # Data Flow
//! ```text
//! connect(params, timer)
//!     → engine.rs        seed entropy (connector)
//!     → credentials.rs   root CA → device cert → private key
//!     → socket.rs        resolve, create, connect (socket2)
//!     → tls.rs           configure rustls client, SNI, verifier
//!     → interface.rs     bounded handshake loop, verify-result check
//!     → session.rs       Established: session owns engine + credentials
//!
//! read/write(buf, timer)
//!     → interface.rs     loop over engine calls, each bounded by the timer
//!     → error.rs         engine statuses translated to TransportError
//!
//! disconnect() → close-notify (best effort)
//! destroy()    → session released: socket, certs, key, TLS state
//! ```
//!
//! # Design Decisions
//! - Upper layers depend on the `Network` trait, never on rustls
//! - The caller's Timer is the only cancellation mechanism
//! - Resources of a failed attempt are released where the attempt fails
//! - One instance drives one connection; callers serialize access

pub mod connection;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod interface;
pub mod params;
pub mod session;
pub mod socket;
pub mod timer;
pub mod tls;

pub use connection::{ConnectionId, ConnectionState};
pub use credentials::{ClientCredentials, CredentialError, CredentialRole, CredentialSource};
pub use engine::{AuthMode, EngineConnector, EngineError, EngineSettings, TlsEngine};
pub use error::{ErrorKind, Recovery, SslFailure, TransportError};
pub use interface::{Network, NetworkInterface};
pub use params::ConnectionParameters;
pub use socket::SocketError;
pub use timer::{Countdown, Timer};
pub use tls::{RustlsConnector, RustlsEngine};

/// Network interface over the rustls engine.
pub type TlsNetwork = NetworkInterface<RustlsConnector>;
