//! Per-actor counters

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ActorMetrics {
    pub messages_processed: AtomicU64,
    pub structural_errors: AtomicU64,
    pub dispatch_faults: AtomicU64,
    pub timers_fired: AtomicU64,
    pub replies_sent: AtomicU64,
}

/// Point-in-time copy of [`ActorMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActorStats {
    pub messages_processed: u64,
    pub structural_errors: u64,
    pub dispatch_faults: u64,
    pub timers_fired: u64,
    pub replies_sent: u64,
}

impl ActorMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ActorStats {
        ActorStats {
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            structural_errors: self.structural_errors.load(Ordering::Relaxed),
            dispatch_faults: self.dispatch_faults.load(Ordering::Relaxed),
            timers_fired: self.timers_fired.load(Ordering::Relaxed),
            replies_sent: self.replies_sent.load(Ordering::Relaxed),
        }
    }
}
