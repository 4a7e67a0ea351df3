//! Caller-owned deadlines.
//!
//! The transport only borrows a [`Timer`] for the duration of one call. It is
//! the sole cancellation mechanism: read, write and handshake loops check it
//! after every engine call.

use std::time::{Duration, Instant};

/// A countdown the transport can query but never resets.
pub trait Timer {
    fn has_expired(&self) -> bool;

    /// Milliseconds left, saturating at zero.
    fn remaining_millis(&self) -> u32;
}

/// Clamp an engine timeout to the caller's deadline.
///
/// Never exceeds `remaining_ms` and never drops below one millisecond, so a
/// narrowed deadline cannot turn into a zero (infinite) socket timeout.
pub fn bounded_timeout(configured_ms: u32, remaining_ms: u32) -> u32 {
    configured_ms.min(remaining_ms).max(1)
}

/// Wall-clock [`Timer`] backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct Countdown {
    deadline: Instant,
}

impl Countdown {
    pub fn new(duration: Duration) -> Self {
        Self {
            deadline: Instant::now() + duration,
        }
    }

    pub fn from_millis(ms: u32) -> Self {
        Self::new(Duration::from_millis(u64::from(ms)))
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

impl Timer for Countdown {
    fn has_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    fn remaining_millis(&self) -> u32 {
        u32::try_from(self.remaining().as_millis()).unwrap_or(u32::MAX)
    }
}
