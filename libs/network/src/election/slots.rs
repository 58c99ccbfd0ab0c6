//! Watch-fed view of held stub slots
//!
//! Mirrors `{ns}/stub/`. Each role's slots sit behind their own lock; the
//! outer map only changes when a role is seen for the first time.

use hive_types::StubSlot;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::discovery::WatchSink;
use crate::routing::Namespace;
use crate::store::{KeyValue, WatchEvent};

type RoleSlots = Arc<RwLock<BTreeMap<i64, StubSlot>>>;

#[derive(Debug)]
pub struct StubSlotMap {
    namespace: Namespace,
    roles: RwLock<HashMap<String, RoleSlots>>,
}

impl StubSlotMap {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            roles: RwLock::new(HashMap::new()),
        }
    }

    fn role(&self, role: &str) -> Option<RoleSlots> {
        self.roles.read().get(role).cloned()
    }

    fn role_or_insert(&self, role: &str) -> RoleSlots {
        if let Some(slots) = self.role(role) {
            return slots;
        }
        self.roles
            .write()
            .entry(role.to_string())
            .or_default()
            .clone()
    }

    /// Number of held slots observed for `role`.
    pub fn count(&self, role: &str) -> i64 {
        self.role(role).map_or(0, |slots| slots.read().len() as i64)
    }

    pub fn get(&self, role: &str, index: i64) -> Option<StubSlot> {
        self.role(role)?.read().get(&index).cloned()
    }

    /// Held slots of `role`, ordered by index.
    pub fn slots(&self, role: &str) -> Vec<StubSlot> {
        self.role(role)
            .map(|slots| slots.read().values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn insert(&self, slot: StubSlot) {
        self.role_or_insert(&slot.role)
            .write()
            .insert(slot.index, slot);
    }

    pub fn remove(&self, role: &str, index: i64) -> Option<StubSlot> {
        self.role(role)?.write().remove(&index)
    }

    fn decode(&self, kv: &KeyValue) -> Option<StubSlot> {
        let (role, index) = self.namespace.parse_stub_key(&kv.key)?;
        match serde_json::from_slice::<StubSlot>(&kv.value) {
            Ok(slot) if slot.role == role && slot.index == index => Some(slot),
            Ok(_) => {
                warn!(key = %kv.key, "Stub slot record does not match its key");
                None
            }
            Err(e) => {
                warn!(key = %kv.key, error = %e, "Malformed stub slot ignored");
                None
            }
        }
    }
}

impl WatchSink for StubSlotMap {
    fn apply(&self, event: WatchEvent) {
        match event {
            WatchEvent::Put(kv) => {
                if let Some(slot) = self.decode(&kv) {
                    debug!(role = %slot.role, slot = slot.index, cluster_id = slot.cluster_id, "Stub slot held");
                    self.insert(slot);
                }
            }
            WatchEvent::Delete { key, .. } => {
                if let Some((role, index)) = self.namespace.parse_stub_key(&key) {
                    debug!(role = %role, slot = index, "Stub slot released");
                    self.remove(&role, index);
                }
            }
        }
    }

    fn resync(&self, snapshot: Vec<KeyValue>) {
        let mut fresh: HashMap<String, BTreeMap<i64, StubSlot>> = HashMap::new();
        for slot in snapshot.iter().filter_map(|kv| self.decode(kv)) {
            fresh.entry(slot.role.clone()).or_default().insert(slot.index, slot);
        }

        let roles: Vec<(String, RoleSlots)> = self
            .roles
            .read()
            .iter()
            .map(|(role, slots)| (role.clone(), slots.clone()))
            .collect();
        for (role, slots) in roles {
            *slots.write() = fresh.remove(&role).unwrap_or_default();
        }
        for (role, slots) in fresh {
            *self.role_or_insert(&role).write() = slots;
        }
    }
}
