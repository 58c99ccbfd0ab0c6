//! Coordination Store
//!
//! Strongly consistent key/value store with leases, prefix watches and
//! create-if-absent transactions. Cluster membership, entity locations, stub
//! slots and worker ids all live here under the cluster namespace.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::Result;

pub mod memory;

pub use memory::MemoryStore;

/// Store-assigned lease identifier. Keys written under a lease vanish when it
/// expires or is revoked.
pub type LeaseId = i64;

/// One stored key with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
    pub lease: Option<LeaseId>,
    pub create_revision: i64,
    pub mod_revision: i64,
}

/// Change observed under a watched prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Put(KeyValue),
    /// `prev` carries the value the key held before deletion.
    Delete { key: String, prev: Option<KeyValue> },
}

impl WatchEvent {
    pub fn key(&self) -> &str {
        match self {
            WatchEvent::Put(kv) => &kv.key,
            WatchEvent::Delete { key, .. } => key,
        }
    }
}

/// Ordered event stream for one watch. Closes when the watch breaks.
pub type WatchStream = mpsc::UnboundedReceiver<WatchEvent>;

/// Coordination store operations used by the cluster layer
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// Current values of every key under `prefix`, sorted by key.
    async fn snapshot(&self, prefix: &str) -> Result<Vec<KeyValue>>;

    /// Subscribe to changes under `prefix` from now on.
    async fn watch(&self, prefix: &str) -> Result<WatchStream>;

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId>;

    /// Write `key` only when it does not exist. Returns whether it was written.
    async fn create_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<bool>;

    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> Result<()>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Extend a lease by its TTL. Fails once the lease is gone.
    async fn renew_lease(&self, lease: LeaseId) -> Result<()>;

    /// Drop a lease and every key attached to it.
    async fn revoke_lease(&self, lease: LeaseId) -> Result<()>;
}
