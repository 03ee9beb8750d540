//! Reference-counted closable lock.
//!
//! Every member carries one of these. Media threads hold a shared guard for
//! the duration of a read or write; the deletion path flips the lock into
//! "closing" and then waits for the holder count to drain to zero before the
//! member is removed and dropped.
//!
//! ```text
//!   open ──begin_close()──► closing ──holders == 0──► closed
//!    │                         │
//!    └─ acquire: holders += 1  └─ acquire(Soft): Err(Closing)
//!                                 acquire(Hard): wait for closed, Err(Closed)
//! ```

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::trace;

/// How hard an acquisition tries when the lock is closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStrength {
    /// Fail immediately if the lock is closing.
    Soft,
    /// Block until the lock has fully closed, then fail.
    Hard,
}

/// Closable lock acquisition failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LockError {
    /// Closing was requested; soft acquisitions are refused.
    #[error("lock is closing")]
    Closing,

    /// The lock drained and closed while a hard acquisition waited.
    #[error("lock is closed")]
    Closed,
}

#[derive(Debug, Default)]
struct LockState {
    closing: bool,
    holders: usize,
}

impl LockState {
    fn is_closed(&self) -> bool {
        self.closing && self.holders == 0
    }
}

/// Holder-counted lock with a one-way transition to closing.
#[derive(Debug, Default)]
pub struct ClosableLock {
    state: Mutex<LockState>,
    drained: Condvar,
}

impl ClosableLock {
    /// Create an open lock with no holders.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a shared hold on the lock.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Closing`] for a soft acquisition once closing was
    /// requested, or [`LockError::Closed`] after a hard acquisition waited for
    /// the lock to drain. Never succeeds once closing was requested.
    pub fn acquire(&self, strength: LockStrength) -> Result<ClosableLockGuard<'_>, LockError> {
        let mut state = self.state.lock();
        if !state.closing {
            state.holders += 1;
            return Ok(ClosableLockGuard { lock: self });
        }

        match strength {
            LockStrength::Soft => Err(LockError::Closing),
            LockStrength::Hard => {
                while !state.is_closed() {
                    self.drained.wait(&mut state);
                }
                Err(LockError::Closed)
            }
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.holders = state.holders.saturating_sub(1);
        if state.is_closed() {
            trace!(target: "mcu.lock", "Last holder released closing lock");
            self.drained.notify_all();
        }
    }

    /// Flag the lock as closing. Returns `true` if this call made the
    /// transition, `false` if closing was already requested.
    pub fn begin_close(&self) -> bool {
        let mut state = self.state.lock();
        if state.closing {
            return false;
        }
        state.closing = true;
        if state.holders == 0 {
            self.drained.notify_all();
        }
        true
    }

    /// Block until closing was requested and every holder has released.
    pub fn await_closed(&self) {
        let mut state = self.state.lock();
        while !state.is_closed() {
            self.drained.wait(&mut state);
        }
    }

    /// Like [`await_closed`](Self::await_closed) but gives up after `timeout`.
    ///
    /// Returns `true` if the lock closed in time.
    pub fn await_closed_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.is_closed() {
            if self.drained.wait_until(&mut state, deadline).timed_out() {
                return state.is_closed();
            }
        }
        true
    }

    /// Whether closing was requested.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.state.lock().closing
    }

    /// Whether the lock is closing with no remaining holders.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().is_closed()
    }

    /// Current number of outstanding holders.
    #[must_use]
    pub fn holders(&self) -> usize {
        self.state.lock().holders
    }
}

/// Shared hold on a [`ClosableLock`]; released on drop.
#[derive(Debug)]
#[must_use = "the hold is released as soon as the guard is dropped"]
pub struct ClosableLockGuard<'a> {
    lock: &'a ClosableLock,
}

impl Drop for ClosableLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
