//! Cluster-wide entity location cache
//!
//! Mirrors `{ns}/location/` from the coordination store. A point send with no
//! explicit cluster id consults this before any other resolution.

use hive_types::{ClusterId, EntityId, ServiceType};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::Namespace;
use crate::discovery::WatchSink;
use crate::store::{KeyValue, WatchEvent};

/// Where an entity currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub service: ServiceType,
    pub cluster_id: ClusterId,
}

#[derive(Debug)]
pub struct LocationCache {
    namespace: Namespace,
    entries: RwLock<HashMap<EntityId, Location>>,
}

impl LocationCache {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, id: EntityId) -> Option<Location> {
        self.entries.read().get(&id).copied()
    }

    /// Cluster owning `id` within `service`. Entries for other services miss.
    pub fn lookup(&self, service: ServiceType, id: EntityId) -> Option<ClusterId> {
        self.get(id)
            .filter(|loc| loc.service == service)
            .map(|loc| loc.cluster_id)
    }

    pub fn insert(&self, id: EntityId, location: Location) {
        self.entries.write().insert(id, location);
    }

    pub fn remove(&self, id: EntityId) -> Option<Location> {
        self.entries.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn decode(&self, kv: &KeyValue) -> Option<(EntityId, Location)> {
        let Some(id) = self.namespace.parse_location_key(&kv.key) else {
            warn!(key = %kv.key, "Malformed location key ignored");
            return None;
        };
        match serde_json::from_slice(&kv.value) {
            Ok(location) => Some((id, location)),
            Err(e) => {
                warn!(key = %kv.key, error = %e, "Malformed location record ignored");
                None
            }
        }
    }
}

impl WatchSink for LocationCache {
    fn apply(&self, event: WatchEvent) {
        match event {
            WatchEvent::Put(kv) => {
                if let Some((id, location)) = self.decode(&kv) {
                    debug!(entity_id = id, cluster_id = location.cluster_id, "Entity located");
                    self.insert(id, location);
                }
            }
            WatchEvent::Delete { key, .. } => {
                if let Some(id) = self.namespace.parse_location_key(&key) {
                    self.remove(id);
                }
            }
        }
    }

    fn resync(&self, snapshot: Vec<KeyValue>) {
        let entries: HashMap<EntityId, Location> =
            snapshot.iter().filter_map(|kv| self.decode(kv)).collect();
        debug!(entries = entries.len(), "Location cache resynced");
        *self.entries.write() = entries;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(ns: &Namespace, id: EntityId, location: Location) -> WatchEvent {
        WatchEvent::Put(KeyValue {
            key: ns.location_key(id),
            value: serde_json::to_vec(&location).unwrap(),
            lease: None,
            create_revision: 1,
            mod_revision: 1,
        })
    }

    #[test]
    fn test_lookup_is_service_scoped() {
        let ns = Namespace::new("server");
        let cache = LocationCache::new(ns.clone());
        cache.apply(put(
            &ns,
            5,
            Location {
                service: ServiceType::Game,
                cluster_id: 77,
            },
        ));

        assert_eq!(cache.lookup(ServiceType::Game, 5), Some(77));
        assert_eq!(cache.lookup(ServiceType::Db, 5), None);

        cache.apply(WatchEvent::Delete {
            key: ns.location_key(5),
            prev: None,
        });
        assert!(cache.is_empty());
    }

    #[test]
    fn test_resync_replaces_contents() {
        let ns = Namespace::new("server");
        let cache = LocationCache::new(ns.clone());
        let game = Location {
            service: ServiceType::Game,
            cluster_id: 1,
        };
        cache.insert(1, game);

        let WatchEvent::Put(kv) = put(&ns, 2, game) else {
            unreachable!()
        };
        cache.resync(vec![kv]);
        assert!(cache.get(1).is_none());
        assert_eq!(cache.get(2), Some(game));
    }
}
