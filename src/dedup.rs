// This file is part of Sentry NVR, a multi-stream video surveillance recorder.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Playback request deduplicator (§4.I): at most one in-flight request per
//! recording id, bounded total concurrency.
//!
//! §9's redesign guidance replaces the fixed 32-slot table with a
//! dictionary of in-flight ids gated by a bounded semaphore, keeping the
//! 429 (duplicate)/503 (overflow) semantics.

use parking_lot::Mutex;
use std::collections::HashSet;
use tokio::sync::{Semaphore, TryAcquireError};

pub const CAPACITY: usize = 32;

#[derive(Debug)]
pub struct Dedup {
    active: Mutex<HashSet<i64>>,
    slots: Semaphore,
}

/// Why `try_activate` refused a request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Rejection {
    /// This id already has a request in flight: HTTP 429.
    Duplicate,
    /// The table is at capacity: HTTP 503.
    Overflow,
}

/// An activation, held for the lifetime of one playback request. Dropping
/// it (on any exit path: success, client disconnect, or error) releases
/// both the id and the capacity slot.
#[derive(Debug)]
pub struct Activation<'a> {
    dedup: &'a Dedup,
    id: i64,
    _permit: tokio::sync::SemaphorePermit<'a>,
}

impl Drop for Activation<'_> {
    fn drop(&mut self) {
        self.dedup.active.lock().remove(&self.id);
    }
}

impl Dedup {
    pub fn new() -> Self {
        Dedup {
            active: Mutex::new(HashSet::new()),
            slots: Semaphore::new(CAPACITY),
        }
    }

    /// Attempts to activate `id`. Succeeds at most once per id until its
    /// `Activation` is dropped.
    pub fn try_activate(&self, id: i64) -> Result<Activation<'_>, Rejection> {
        {
            let mut active = self.active.lock();
            if active.contains(&id) {
                return Err(Rejection::Duplicate);
            }
            // Reserve the id before acquiring the semaphore permit so a
            // racing duplicate request can't also pass the id check while
            // we're waiting — there's no waiting here, but keeping the
            // order consistent avoids depending on semaphore fairness.
            active.insert(id);
        }
        match self.slots.try_acquire() {
            Ok(permit) => Ok(Activation {
                dedup: self,
                id,
                _permit: permit,
            }),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => {
                self.active.lock().remove(&id);
                Err(Rejection::Overflow)
            }
        }
    }
}

impl Default for Dedup {
    fn default() -> Self {
        Dedup::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_request_for_same_id_is_rejected() {
        let dedup = Dedup::new();
        let first = dedup.try_activate(42).unwrap();
        assert_eq!(dedup.try_activate(42).unwrap_err(), Rejection::Duplicate);
        drop(first);
        assert!(dedup.try_activate(42).is_ok());
    }

    #[test]
    fn overflow_past_capacity_is_rejected() {
        let dedup = Dedup::new();
        let mut activations = Vec::new();
        for id in 0..CAPACITY as i64 {
            activations.push(dedup.try_activate(id).unwrap());
        }
        assert_eq!(
            dedup.try_activate(CAPACITY as i64).unwrap_err(),
            Rejection::Overflow
        );
        activations.pop();
        assert!(dedup.try_activate(CAPACITY as i64).is_ok());
    }

    #[test]
    fn every_exit_path_releases_the_id() {
        let dedup = Dedup::new();
        {
            let _a = dedup.try_activate(7).unwrap();
            assert_eq!(dedup.try_activate(7).unwrap_err(), Rejection::Duplicate);
        }
        assert!(dedup.try_activate(7).is_ok());
    }
}
