//! Connection identity and state machine.
//!
//! # States
//! ```text
//! Uninitialized → ParamsSet → TcpConnecting → TcpConnected → TlsHandshaking → Established
//!                     ↑                                                          │
//!                     └──────────── connect() again ◀── Disconnected ◀───────────┘
//!
//! Any non-terminal state → Failed (one attempt); connect() may start over.
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for connection IDs. Relaxed ordering: only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a network interface instance, used in log spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Where a connection attempt currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No parameters stored yet.
    Uninitialized,
    /// Parameters stored, no attempt in flight.
    ParamsSet,
    /// Entropy, credentials and TCP connect in progress.
    TcpConnecting,
    /// TCP up, TLS engine being configured.
    TcpConnected,
    TlsHandshaking,
    /// Application data may flow.
    Established,
    /// Close-notify sent; resources still held until destroy.
    Disconnected,
    /// The last attempt failed; resources of that attempt are gone.
    Failed,
}

impl ConnectionState {
    /// Whether `next` is a legal successor of `self`.
    pub fn allows(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (_, Failed) => !matches!(self, Failed | Established | Disconnected),
            (_, Uninitialized) => true,
            (Uninitialized | ParamsSet | Failed | Disconnected | Established, ParamsSet) => true,
            (ParamsSet, TcpConnecting) => true,
            (TcpConnecting, TcpConnected) => true,
            (TcpConnected, TlsHandshaking) => true,
            (TlsHandshaking, Established) => true,
            (Established, Disconnected) => true,
            _ => false,
        }
    }

    pub fn is_established(self) -> bool {
        self == ConnectionState::Established
    }

    /// Move to `next`, logging the step.
    pub fn advance(&mut self, next: ConnectionState) {
        debug_assert!(
            self.allows(next),
            "illegal connection transition {:?} -> {:?}",
            self,
            next
        );
        tracing::trace!(from = ?*self, to = ?next, "Connection state transition");
        *self = next;
    }
}
