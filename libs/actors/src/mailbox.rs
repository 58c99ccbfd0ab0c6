//! Actor mailbox with a single wake flag
//!
//! Producers push under a short lock and signal the worker only when no wake
//! is already pending, so a burst of sends costs one wake-up. The worker
//! clears the flag before draining: anything pushed after the clear raises a
//! fresh wake, anything pushed before it is seen by the drain.

use hive_types::Envelope;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

use crate::timer::TimerHandle;

/// One unit of work for a worker.
#[derive(Debug)]
pub(crate) enum Mail {
    Envelope(Envelope),
    Timer(TimerHandle),
}

#[derive(Debug, Default)]
pub(crate) struct Mailbox {
    queue: Mutex<VecDeque<Mail>>,
    wake_pending: AtomicBool,
    wake: Notify,
}

impl Mailbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, mail: Mail) {
        self.queue.lock().push_back(mail);
        if self
            .wake_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.wake.notify_one();
        }
    }

    pub(crate) fn pop(&self) -> Option<Mail> {
        self.queue.lock().pop_front()
    }

    /// Must run before a drain, never after.
    pub(crate) fn clear_wake(&self) {
        self.wake_pending.store(false, Ordering::Release);
    }

    pub(crate) async fn woken(&self) {
        self.wake.notified().await
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.lock().len()
    }
}
