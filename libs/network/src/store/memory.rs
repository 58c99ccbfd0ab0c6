//! In-process coordination store
//!
//! Single-mutex key/value map with revisions, leases and prefix watches.
//! Leases expire lazily on every operation and, when a reaper task is
//! running, on a fixed interval. An availability switch makes every call fail
//! and breaks open watches, which is how outages are exercised in tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{CoordinationStore, KeyValue, LeaseId, WatchEvent, WatchStream};
use crate::{ClusterError, Result};

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    lease: Option<LeaseId>,
    create_revision: i64,
    mod_revision: i64,
}

#[derive(Debug)]
struct Lease {
    ttl: Duration,
    expires_at: Instant,
    keys: BTreeSet<String>,
}

#[derive(Debug)]
struct Watcher {
    prefix: String,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

#[derive(Debug, Default)]
struct StoreState {
    revision: i64,
    next_lease: LeaseId,
    entries: BTreeMap<String, Entry>,
    leases: HashMap<LeaseId, Lease>,
    watchers: Vec<Watcher>,
}

fn key_value(key: &str, entry: &Entry) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: entry.value.clone(),
        lease: entry.lease,
        create_revision: entry.create_revision,
        mod_revision: entry.mod_revision,
    }
}

fn lease_not_found(lease: LeaseId) -> ClusterError {
    ClusterError::coordination(format!("lease {lease} not found"))
}

impl StoreState {
    fn notify(&mut self, event: WatchEvent) {
        // Closed receivers are pruned here
        self.watchers.retain(|w| {
            if !event.key().starts_with(&w.prefix) {
                return true;
            }
            w.tx.send(event.clone()).is_ok()
        });
    }

    fn detach(&mut self, key: &str, lease: Option<LeaseId>) {
        if let Some(lease) = lease.and_then(|id| self.leases.get_mut(&id)) {
            lease.keys.remove(key);
        }
    }

    fn put(&mut self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> Result<()> {
        if let Some(id) = lease {
            if !self.leases.contains_key(&id) {
                return Err(lease_not_found(id));
            }
        }

        self.revision += 1;
        let revision = self.revision;
        let create_revision = match self.entries.get(key).map(|e| (e.create_revision, e.lease)) {
            Some((created, previous)) => {
                if previous != lease {
                    self.detach(key, previous);
                }
                created
            }
            None => revision,
        };
        if let Some(lease) = lease.and_then(|id| self.leases.get_mut(&id)) {
            lease.keys.insert(key.to_string());
        }

        let entry = Entry {
            value,
            lease,
            create_revision,
            mod_revision: revision,
        };
        let kv = key_value(key, &entry);
        self.entries.insert(key.to_string(), entry);
        self.notify(WatchEvent::Put(kv));
        Ok(())
    }

    fn remove(&mut self, key: &str) -> bool {
        let Some(entry) = self.entries.remove(key) else {
            return false;
        };
        self.revision += 1;
        self.detach(key, entry.lease);
        let prev = key_value(key, &entry);
        self.notify(WatchEvent::Delete {
            key: key.to_string(),
            prev: Some(prev),
        });
        true
    }

    fn drop_lease(&mut self, id: LeaseId) -> bool {
        let Some(lease) = self.leases.remove(&id) else {
            return false;
        };
        for key in &lease.keys {
            self.remove(key);
        }
        true
    }

    fn expire(&mut self, now: Instant) -> usize {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            debug!(lease = id, "Lease expired");
            self.drop_lease(*id);
        }
        expired.len()
    }
}

/// Coordination store held entirely in process memory
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState {
                next_lease: 1,
                ..StoreState::default()
            }),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage. While unavailable every operation fails and all
    /// open watches are closed.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if available {
            info!("Coordination store available");
        } else {
            let mut state = self.state.lock();
            let broken = state.watchers.len();
            state.watchers.clear();
            warn!(watches = broken, "Coordination store unavailable");
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Expire overdue leases now. Returns how many expired.
    pub fn expire_leases(&self) -> usize {
        self.state.lock().expire(Instant::now())
    }

    /// Expire leases every `interval` until the store is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.expire_leases();
            }
        })
    }

    /// Current value of `key`, bypassing the availability switch.
    pub fn get(&self, key: &str) -> Option<KeyValue> {
        let state = self.state.lock();
        state.entries.get(key).map(|e| key_value(key, e))
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lease_count(&self) -> usize {
        self.state.lock().leases.len()
    }

    fn with_state<T>(&self, op: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        if !self.is_available() {
            return Err(ClusterError::coordination("store unavailable"));
        }
        let mut state = self.state.lock();
        state.expire(Instant::now());
        op(&mut state)
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn snapshot(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        self.with_state(|state| {
            Ok(state
                .entries
                .range(prefix.to_string()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .map(|(key, entry)| key_value(key, entry))
                .collect())
        })
    }

    async fn watch(&self, prefix: &str) -> Result<WatchStream> {
        self.with_state(|state| {
            let (tx, rx) = mpsc::unbounded_channel();
            state.watchers.push(Watcher {
                prefix: prefix.to_string(),
                tx,
            });
            Ok(rx)
        })
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId> {
        if ttl.is_zero() {
            return Err(ClusterError::coordination("lease ttl must be positive"));
        }
        self.with_state(|state| {
            let id = state.next_lease;
            state.next_lease += 1;
            state.leases.insert(
                id,
                Lease {
                    ttl,
                    expires_at: Instant::now() + ttl,
                    keys: BTreeSet::new(),
                },
            );
            Ok(id)
        })
    }

    async fn create_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<bool> {
        self.with_state(|state| {
            if state.entries.contains_key(key) {
                return Ok(false);
            }
            state.put(key, value, lease)?;
            Ok(true)
        })
    }

    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> Result<()> {
        self.with_state(|state| state.put(key, value, lease))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.with_state(|state| Ok(state.remove(key)))
    }

    async fn renew_lease(&self, lease: LeaseId) -> Result<()> {
        self.with_state(|state| {
            let entry = state
                .leases
                .get_mut(&lease)
                .ok_or_else(|| lease_not_found(lease))?;
            entry.expires_at = Instant::now() + entry.ttl;
            Ok(())
        })
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<()> {
        self.with_state(|state| {
            if state.drop_lease(lease) {
                Ok(())
            } else {
                Err(lease_not_found(lease))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_if_absent_only_once() {
        let store = MemoryStore::new();
        assert!(store.create_if_absent("a/1", b"x".to_vec(), None).await.unwrap());
        assert!(!store.create_if_absent("a/1", b"y".to_vec(), None).await.unwrap());
        assert_eq!(store.get("a/1").unwrap().value, b"x".to_vec());
    }

    #[tokio::test]
    async fn test_snapshot_is_prefix_scoped_and_sorted() {
        let store = MemoryStore::new();
        store.put("ns/game/b", vec![2], None).await.unwrap();
        store.put("ns/game/a", vec![1], None).await.unwrap();
        store.put("ns/gate/c", vec![3], None).await.unwrap();
        store.put("other/x", vec![4], None).await.unwrap();

        let keys: Vec<String> = store
            .snapshot("ns/game/")
            .await
            .unwrap()
            .into_iter()
            .map(|kv| kv.key)
            .collect();
        assert_eq!(keys, vec!["ns/game/a", "ns/game/b"]);
    }

    #[tokio::test]
    async fn test_revoke_deletes_attached_keys_with_prev_value() {
        let store = MemoryStore::new();
        let mut watch = store.watch("ns/").await.unwrap();
        let lease = store.grant_lease(Duration::from_secs(10)).await.unwrap();
        store.put("ns/k", b"v".to_vec(), Some(lease)).await.unwrap();
        store.revoke_lease(lease).await.unwrap();

        assert!(matches!(watch.recv().await, Some(WatchEvent::Put(_))));
        match watch.recv().await {
            Some(WatchEvent::Delete { key, prev }) => {
                assert_eq!(key, "ns/k");
                assert_eq!(prev.unwrap().value, b"v".to_vec());
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(store.renew_lease(lease).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_expires_without_renewal() {
        let store = MemoryStore::new();
        let lease = store.grant_lease(Duration::from_secs(3)).await.unwrap();
        store.put("k", vec![], Some(lease)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        store.renew_lease(lease).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.expire_leases(), 0);
        assert!(store.get("k").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.expire_leases(), 1);
        assert!(store.get("k").is_none());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_and_closes_watches() {
        let store = MemoryStore::new();
        let mut watch = store.watch("").await.unwrap();
        store.set_available(false);

        assert!(watch.recv().await.is_none());
        let err = store.put("k", vec![], None).await.unwrap_err();
        assert_eq!(err.category(), "coordination");

        store.set_available(true);
        store.put("k", vec![], None).await.unwrap();
    }

    #[tokio::test]
    async fn test_put_with_unknown_lease_fails() {
        let store = MemoryStore::new();
        assert!(store.put("k", vec![], Some(99)).await.is_err());
        assert!(store.is_empty());
    }
}
