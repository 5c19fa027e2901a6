//! Mutex + condition variable pair used for every cross-thread handshake.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

/// Outcome of [`SyncSignal::timed_wait`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Signaled,
    TimedOut,
}

/// Outcome of [`SyncSignal::try_signal`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrySignal {
    Delivered,
    /// Somebody else holds the mutex; nothing was signaled
    Busy,
}

/// A mutex protecting `T` paired with a condition variable.
///
/// Waits may wake spuriously; callers always loop on a predicate over the
/// guarded value.
#[derive(Debug, Default)]
pub struct SyncSignal<T = ()> {
    mutex: Mutex<T>,
    cond: Condvar,
}

impl<T> SyncSignal<T> {
    pub fn new(value: T) -> Self {
        Self {
            mutex: Mutex::new(value),
            cond: Condvar::new(),
        }
    }

    /// Acquire the mutex. Dropping the guard leaves it.
    pub fn enter(&self) -> MutexGuard<'_, T> {
        self.mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release the mutex held by `guard`
    pub fn leave(&self, guard: MutexGuard<'_, T>) {
        drop(guard);
    }

    /// Release the mutex, block until signaled, reacquire
    pub fn wait<'a>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`
    pub fn timed_wait<'a>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
    ) -> (MutexGuard<'a, T>, WaitResult) {
        let (guard, result) = self
            .cond
            .wait_timeout(guard, timeout)
            .unwrap_or_else(PoisonError::into_inner);
        let outcome = if result.timed_out() {
            WaitResult::TimedOut
        } else {
            WaitResult::Signaled
        };
        (guard, outcome)
    }

    /// Wake one waiter without touching the mutex.
    ///
    /// A waiter that has checked its predicate but not yet started waiting
    /// misses this wakeup; only use where the waiter times out anyway.
    pub fn signal(&self) {
        self.cond.notify_one();
    }

    /// Wake every waiter without touching the mutex
    pub fn broadcast(&self) {
        self.cond.notify_all();
    }

    /// Signal only if the mutex can be taken without blocking
    pub fn try_signal(&self) -> TrySignal {
        match self.mutex.try_lock() {
            Ok(guard) => {
                self.cond.notify_one();
                drop(guard);
                TrySignal::Delivered
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                let guard = poisoned.into_inner();
                self.cond.notify_one();
                drop(guard);
                TrySignal::Delivered
            }
            Err(TryLockError::WouldBlock) => TrySignal::Busy,
        }
    }

    /// Acquire, signal, release. Never loses the wakeup but may block.
    pub fn signal_sync(&self) {
        let guard = self.enter();
        self.cond.notify_one();
        drop(guard);
    }
}
