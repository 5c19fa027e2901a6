//! One-at-a-time action requests with acknowledgement.
//!
//! A requester posts an action, pokes the worker and waits until the worker
//! has taken it and reset the slot. The worker only looks at the slot at the
//! top of its own loop. A worker that exits closes its channel, which
//! releases any waiting requester and makes later requests return at once.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, trace, warn};

use crate::audio::sync::SyncSignal;

/// How long a requester waits before poking the worker again
const RETRY_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
struct Slot<A, R> {
    action: Option<A>,
    result: Option<R>,
}

/// Action slot shared between requesters and one worker thread
#[derive(Debug)]
pub struct ActionChannel<A, R> {
    name: &'static str,
    requests: Mutex<()>,
    slot: SyncSignal<Slot<A, R>>,
    pending: AtomicBool,
    closed: AtomicBool,
    worker: Arc<SyncSignal<()>>,
}

impl<A, R> ActionChannel<A, R>
where
    A: Copy + Debug,
{
    /// `worker` is the condition the worker thread idles on
    pub fn new(name: &'static str, worker: Arc<SyncSignal<()>>) -> Self {
        Self {
            name,
            requests: Mutex::new(()),
            slot: SyncSignal::new(Slot {
                action: None,
                result: None,
            }),
            pending: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            worker,
        }
    }

    /// Post `action` and block until the worker has acknowledged it.
    ///
    /// Returns whatever result the worker attached to the acknowledgement,
    /// or `None` once the worker is gone.
    /// Must not be called from the worker thread itself.
    pub fn trigger(&self, action: A) -> Option<R> {
        let _serial = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            warn!("{}: {:?} requested after the worker exited", self.name, action);
            return None;
        }
        trace!("{}: triggering {:?}", self.name, action);
        self.post(action);
        self.await_ack()
    }

    /// Store `action` in the slot.
    ///
    /// # Panics
    /// If another action is still pending; two in-flight actions on one
    /// worker is a caller bug.
    pub(crate) fn post(&self, action: A) {
        let mut slot = self.slot.enter();
        assert!(
            slot.action.is_none(),
            "{}: {:?} requested while {:?} is still pending",
            self.name,
            action,
            slot.action
        );
        slot.action = Some(action);
        slot.result = None;
        self.pending.store(true, Ordering::Release);
    }

    pub(crate) fn await_ack(&self) -> Option<R> {
        let mut slot = self.slot.enter();
        while slot.action.is_some() {
            if self.is_closed() {
                slot.action = None;
                self.pending.store(false, Ordering::Release);
                return None;
            }
            // A busy worker polls the slot on its own; an idle one needs a poke.
            self.worker.try_signal();
            let (guard, _) = self.slot.timed_wait(slot, RETRY_INTERVAL);
            slot = guard;
        }
        slot.result.take()
    }

    /// Called by the worker when it stops serving requests
    pub fn close(&self) {
        let mut slot = self.slot.enter();
        self.closed.store(true, Ordering::Release);
        if let Some(action) = slot.action.take() {
            debug!("{}: dropping {:?}, worker exited", self.name, action);
        }
        slot.result = None;
        self.pending.store(false, Ordering::Release);
        self.slot.broadcast();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Lock-free check for the worker loop
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// The pending action, if any, without taking it
    pub fn peek(&self) -> Option<A> {
        if !self.is_pending() {
            return None;
        }
        self.slot.enter().action
    }

    /// Mark the pending action as done and release the requester
    pub fn acknowledge(&self, result: Option<R>) {
        let mut slot = self.slot.enter();
        debug_assert!(slot.action.is_some(), "{}: acknowledge without action", self.name);
        trace!("{}: acknowledged {:?}", self.name, slot.action);
        slot.action = None;
        slot.result = result;
        self.pending.store(false, Ordering::Release);
        self.slot.broadcast();
    }
}
