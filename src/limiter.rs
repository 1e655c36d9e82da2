//! Two-bound concurrency limiter.
//!
//! Bounds simultaneous in-flight jobs globally and per requester. The
//! per-requester check never blocks: a requester already at its bound is
//! refused with [`Throttled`] even when global capacity remains, so one
//! flooding requester cannot starve the others. Waiting happens only on
//! the global bound.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::job::RequesterId;

/// Non-blocking refusal: the requester is already running its maximum
/// number of jobs.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("requester is at its concurrency bound")]
pub struct Throttled;

type ActiveCounts = Arc<Mutex<HashMap<RequesterId, usize>>>;

/// Reserved per-requester seat. Decrements the requester's count when
/// dropped, so a caller abandoned mid-acquire cannot leak a seat.
#[derive(Debug)]
struct Seat {
    requester: RequesterId,
    active: ActiveCounts,
}

impl Drop for Seat {
    fn drop(&mut self) {
        let mut active = self.active.lock().expect("limiter lock poisoned");
        match active.get_mut(&self.requester) {
            Some(count) if *count > 1 => *count -= 1,
            _ => {
                active.remove(&self.requester);
            }
        }
    }
}

/// Concurrency permit for one job. Frees exactly one global and one
/// per-requester slot when dropped; scoped acquisition makes a leaked
/// token impossible on any exit path.
#[derive(Debug)]
pub struct JobToken {
    _permit: OwnedSemaphorePermit,
    _seat: Seat,
}

#[derive(Debug)]
pub struct ConcurrencyLimiter {
    global: Arc<Semaphore>,
    per_requester_bound: usize,
    active: ActiveCounts,
}

impl ConcurrencyLimiter {
    /// # Panics
    /// Panics if either bound is zero or the per-requester bound exceeds
    /// the global bound; [`crate::config::Config`] validates both upstream.
    #[must_use]
    pub fn new(global_bound: usize, per_requester_bound: usize) -> Self {
        assert!(global_bound > 0, "global bound must be positive");
        assert!(
            (1..=global_bound).contains(&per_requester_bound),
            "per-requester bound must be in 1..=global bound"
        );
        Self {
            global: Arc::new(Semaphore::new(global_bound)),
            per_requester_bound,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Acquire a job slot for `requester`.
    ///
    /// Waits for global capacity, but refuses immediately when the
    /// requester is already at its per-requester bound.
    ///
    /// # Errors
    /// Returns [`Throttled`] without consuming any slot when the requester
    /// is at its bound.
    pub async fn acquire(&self, requester: RequesterId) -> Result<JobToken, Throttled> {
        let seat = self.reserve_seat(requester)?;

        let permit = Arc::clone(&self.global)
            .acquire_owned()
            .await
            .expect("concurrency semaphore should not be closed");

        debug!(%requester, "job slot acquired");
        Ok(JobToken {
            _permit: permit,
            _seat: seat,
        })
    }

    fn reserve_seat(&self, requester: RequesterId) -> Result<Seat, Throttled> {
        let mut active = self.active.lock().expect("limiter lock poisoned");
        let count = active.entry(requester).or_insert(0);
        if *count >= self.per_requester_bound {
            debug!(%requester, count = *count, "requester throttled");
            return Err(Throttled);
        }
        *count += 1;
        Ok(Seat {
            requester,
            active: Arc::clone(&self.active),
        })
    }

    /// Global slots currently free.
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.global.available_permits()
    }

    /// Jobs (or in-flight acquisitions) currently held by one requester.
    #[must_use]
    pub fn active_for(&self, requester: RequesterId) -> usize {
        let active = self.active.lock().expect("limiter lock poisoned");
        active.get(&requester).copied().unwrap_or(0)
    }
}
