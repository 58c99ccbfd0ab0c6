//! Service Discovery
//!
//! ## Purpose
//!
//! Keeps every node's view of the cluster in step with the coordination
//! store: who is registered under each service type, which process holds this
//! node's worker id, and the lease that keeps this node's own record alive.
//!
//! ## Architecture Role
//!
//! ```mermaid
//! graph LR
//!     Store[(Coordination Store)] -->|watch ns/| Membership
//!     Store -->|watch ns/location/| Locations[Location Cache]
//!     Store -->|watch ns/stub/| Slots[Stub Slot Map]
//!     Registration[Service Registration] -->|lease + put| Store
//!     WorkerId[Worker-Id Lease] -->|create if absent| Store
//!     Membership -->|ring lookup| Router[Cluster Node]
//! ```
//!
//! ## Failure Model
//!
//! Only the first watch and snapshot at startup may fail the caller. Once a
//! watch is running it re-subscribes after a backoff whenever the stream
//! breaks, and resynchronises from a fresh snapshot.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::store::LeaseId;

pub mod membership;
pub mod registration;
pub mod watch;
pub mod worker_id;

pub use membership::Membership;
pub use registration::{AttachedRecords, ServiceRegistration};
pub use watch::{start_watch, WatchSink};
pub use worker_id::{WorkerIdLease, MAX_WORKER_ID};

/// Shared view of a lease that a background loop may replace.
#[derive(Debug, Clone, Default)]
pub struct LeaseHandle(Arc<AtomicI64>);

impl LeaseHandle {
    /// Current lease, `None` before the first grant or after revocation.
    pub fn get(&self) -> Option<LeaseId> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    pub(crate) fn set(&self, lease: Option<LeaseId>) {
        self.0.store(lease.unwrap_or(0), Ordering::SeqCst);
    }
}
