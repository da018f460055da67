//! Process-wide cap on simultaneous endpoint calls.
//!
//! Chunk workers and bundle verifiers each run their own pool; a shared
//! [`RequestBudget`] keeps their combined in-flight calls under one limit.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RequestBudget {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl Default for RequestBudget {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl RequestBudget {
    /// At most `max_in_flight` calls at once. Zero is clamped to one.
    pub fn new(max_in_flight: usize) -> Self {
        let capacity = max_in_flight.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(Semaphore::MAX_PERMITS)
    }

    pub fn from_limit(max_in_flight: Option<usize>) -> Self {
        max_in_flight.map(Self::new).unwrap_or_default()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }

    /// Waits for a permit; the permit is returned when dropped. `None` once
    /// `token` fires.
    pub async fn acquire(&self, token: &CancellationToken) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            // The semaphore is never closed.
            permit = self.permits.clone().acquire_owned() => permit.ok(),
        }
    }
}
