//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! net/ produces:
//!     → span "tls_transport" per interface (conn, host, port)
//!     → events for each connect step, verify flags, close/release
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, compact or pretty)
//!     → any subscriber the embedding application installs
//! ```
//!
//! # Design Decisions
//! - Structured fields, never formatted-in identifiers
//! - Connection id flows through every event via the span
//! - Credential material is never logged

pub mod logging;

pub use logging::{init_logging, LoggingError};
