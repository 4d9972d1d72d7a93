//! # Conflict Backoff
//!
//! Bounded exponential backoff for optimistic-concurrency conflicts on
//! status writes: 1s, 2s, 4s, 8s, 16s, then give up. Any error other than a
//! conflict abandons the attempt immediately, so the sequence only ever
//! paces retries against a resource another writer is touching.

use std::time::Duration;

/// Exponential backoff calculator with a fixed attempt budget.
#[derive(Debug, Clone)]
pub struct ConflictBackoff {
    current: Duration,
    remaining: u32,
}

impl ConflictBackoff {
    /// Default policy for status-update conflicts: 5 attempts doubling
    /// from 1 second.
    #[must_use]
    pub fn for_status_updates() -> Self {
        Self::new(Duration::from_secs(1), 5)
    }

    #[must_use]
    pub fn new(initial: Duration, attempts: u32) -> Self {
        Self {
            current: initial,
            remaining: attempts,
        }
    }

    /// Returns the next delay, or `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let delay = self.current;
        self.current = self.current.saturating_mul(2);
        Some(delay)
    }
}

/// Whether a kube error is an optimistic-concurrency conflict (HTTP 409).
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 409)
}
