//! Cluster membership
//!
//! One shard per service type, each holding the member map and the hash ring
//! behind a single lock. An add or remove updates both inside one critical
//! section, so routing never observes a member in one and not the other.

use hive_types::{member_id, ClusterId, ClusterMember, EntityId, ServiceType};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use super::WatchSink;
use crate::routing::{HashRing, Namespace, DEFAULT_REPLICAS};
use crate::store::{KeyValue, WatchEvent};

#[derive(Debug)]
struct MemberShard {
    // Colliding ids keep every address; the smallest one answers lookups
    members: HashMap<ClusterId, BTreeMap<String, ClusterMember>>,
    ring: HashRing,
}

impl MemberShard {
    fn new(replicas: usize) -> Self {
        Self {
            members: HashMap::new(),
            ring: HashRing::new(replicas),
        }
    }

    fn add(&mut self, member: ClusterMember) -> bool {
        let address = member.address();
        let previous = self
            .members
            .entry(member.id())
            .or_default()
            .insert(address.clone(), member);
        self.ring.add(&address);
        previous.is_none()
    }

    fn remove(&mut self, address: &str) -> Option<ClusterMember> {
        let id = member_id(address);
        let by_address = self.members.get_mut(&id)?;
        let removed = by_address.remove(address)?;
        if by_address.is_empty() {
            self.members.remove(&id);
        }
        self.ring.remove(address);
        Some(removed)
    }

    fn get(&self, id: ClusterId) -> Option<&ClusterMember> {
        self.members.get(&id)?.values().next()
    }

    fn resolve(&self, key: EntityId) -> Option<&ClusterMember> {
        let address = self.ring.get(key)?;
        self.members.get(&member_id(address))?.get(address)
    }

    fn clear(&mut self) {
        self.members.clear();
        self.ring = HashRing::new(self.ring.replicas());
    }
}

const SERVICE_COUNT: usize = ServiceType::ALL.len();

fn shard_index(service: ServiceType) -> usize {
    match service {
        ServiceType::Client => 0,
        ServiceType::Gate => 1,
        ServiceType::Game => 2,
        ServiceType::Db => 3,
    }
}

/// Watch-fed member maps and rings for every service type
#[derive(Debug)]
pub struct Membership {
    namespace: Namespace,
    shards: [RwLock<MemberShard>; SERVICE_COUNT],
}

impl Membership {
    pub fn new(namespace: Namespace) -> Self {
        Self::with_replicas(namespace, DEFAULT_REPLICAS)
    }

    pub fn with_replicas(namespace: Namespace, replicas: usize) -> Self {
        Self {
            namespace,
            shards: std::array::from_fn(|_| RwLock::new(MemberShard::new(replicas))),
        }
    }

    fn shard(&self, service: ServiceType) -> &RwLock<MemberShard> {
        &self.shards[shard_index(service)]
    }

    pub fn add(&self, member: ClusterMember) {
        let service = member.service;
        let address = member.address();
        if self.shard(service).write().add(member) {
            info!(service = %service, address = %address, "Cluster member joined");
        }
    }

    pub fn remove(&self, service: ServiceType, address: &str) -> Option<ClusterMember> {
        let removed = self.shard(service).write().remove(address);
        if removed.is_some() {
            info!(service = %service, address = %address, "Cluster member left");
        }
        removed
    }

    /// Member by cluster id.
    pub fn get(&self, service: ServiceType, id: ClusterId) -> Option<ClusterMember> {
        self.shard(service).read().get(id).cloned()
    }

    /// Ring owner of `key`.
    pub fn resolve(&self, service: ServiceType, key: EntityId) -> Option<ClusterMember> {
        self.shard(service).read().resolve(key).cloned()
    }

    pub fn contains(&self, service: ServiceType, address: &str) -> bool {
        let shard = self.shard(service).read();
        shard.ring.contains(address)
            && shard
                .members
                .get(&member_id(address))
                .is_some_and(|m| m.contains_key(address))
    }

    /// Members of one service type, ordered by address.
    pub fn members(&self, service: ServiceType) -> Vec<ClusterMember> {
        let shard = self.shard(service).read();
        let mut members: Vec<ClusterMember> = shard
            .members
            .values()
            .flat_map(|by_address| by_address.values().cloned())
            .collect();
        members.sort_by_key(ClusterMember::address);
        members
    }

    pub fn len(&self, service: ServiceType) -> usize {
        self.shard(service).read().ring.len()
    }

    fn decode(&self, kv: &KeyValue) -> Option<ClusterMember> {
        let (service, address) = self.namespace.parse_member_key(&kv.key)?;
        match serde_json::from_slice::<ClusterMember>(&kv.value) {
            Ok(member) if member.service == service && member.address() == address => Some(member),
            Ok(member) => {
                warn!(key = %kv.key, address = %member.address(), "Member record does not match its key");
                None
            }
            Err(e) => {
                warn!(key = %kv.key, error = %e, "Malformed member record ignored");
                None
            }
        }
    }
}

impl WatchSink for Membership {
    fn apply(&self, event: WatchEvent) {
        match event {
            WatchEvent::Put(kv) => {
                if let Some(member) = self.decode(&kv) {
                    self.add(member);
                }
            }
            WatchEvent::Delete { key, prev } => {
                let target = self.namespace.parse_member_key(&key).or_else(|| {
                    let member = self.decode(prev.as_ref()?)?;
                    Some((member.service, member.address()))
                });
                if let Some((service, address)) = target {
                    self.remove(service, &address);
                }
            }
        }
    }

    fn resync(&self, snapshot: Vec<KeyValue>) {
        let mut by_service: HashMap<ServiceType, Vec<ClusterMember>> = HashMap::new();
        for member in snapshot.iter().filter_map(|kv| self.decode(kv)) {
            by_service.entry(member.service).or_default().push(member);
        }

        for service in ServiceType::ALL {
            let members = by_service.remove(&service).unwrap_or_default();
            let count = members.len();
            let mut shard = self.shard(service).write();
            shard.clear();
            for member in members {
                shard.add(member);
            }
            debug!(service = %service, members = count, "Membership resynced");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(ns: &Namespace, member: &ClusterMember) -> WatchEvent {
        WatchEvent::Put(KeyValue {
            key: ns.member_key(member),
            value: serde_json::to_vec(member).unwrap(),
            lease: Some(1),
            create_revision: 1,
            mod_revision: 1,
        })
    }

    #[test]
    fn test_put_and_delete_update_map_and_ring() {
        let ns = Namespace::new("server");
        let membership = Membership::new(ns.clone());
        let member = ClusterMember::new(ServiceType::Game, "10.0.0.1", 7000);

        membership.apply(put(&ns, &member));
        assert!(membership.contains(ServiceType::Game, "10.0.0.1:7000"));
        assert_eq!(membership.get(ServiceType::Game, member.id()), Some(member.clone()));
        assert_eq!(membership.resolve(ServiceType::Game, 42), Some(member.clone()));
        assert!(membership.members(ServiceType::Gate).is_empty());

        membership.apply(WatchEvent::Delete {
            key: ns.member_key(&member),
            prev: None,
        });
        assert!(!membership.contains(ServiceType::Game, "10.0.0.1:7000"));
        assert!(membership.resolve(ServiceType::Game, 42).is_none());
    }

    #[test]
    fn test_non_member_keys_are_ignored() {
        let ns = Namespace::new("server");
        let membership = Membership::new(ns);
        membership.apply(WatchEvent::Put(KeyValue {
            key: "server/location/5".into(),
            value: b"{}".to_vec(),
            lease: None,
            create_revision: 1,
            mod_revision: 1,
        }));
        for service in ServiceType::ALL {
            assert_eq!(membership.len(service), 0);
        }
    }

    #[test]
    fn test_resync_drops_members_missing_from_snapshot() {
        let ns = Namespace::new("server");
        let membership = Membership::new(ns.clone());
        let gone = ClusterMember::new(ServiceType::Gate, "10.0.0.1", 1);
        let kept = ClusterMember::new(ServiceType::Gate, "10.0.0.2", 1);
        membership.add(gone.clone());

        let WatchEvent::Put(kv) = put(&ns, &kept) else {
            unreachable!()
        };
        membership.resync(vec![kv]);
        assert_eq!(membership.members(ServiceType::Gate), vec![kept]);
    }

    #[test]
    fn test_readers_never_see_map_and_ring_disagree() {
        let ns = Namespace::new("server");
        let membership = Membership::with_replicas(ns.clone(), 16);
        let members: Vec<ClusterMember> = (1..=8)
            .map(|port| ClusterMember::new(ServiceType::Game, "10.0.0.1", port))
            .collect();
        let stop = std::sync::atomic::AtomicBool::new(false);
        let mut visible_after_put = true;

        std::thread::scope(|scope| {
            for _ in 0..3 {
                scope.spawn(|| {
                    while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                        let shard = membership.shard(ServiceType::Game).read();
                        let in_map: usize = shard.members.values().map(BTreeMap::len).sum();
                        assert_eq!(in_map, shard.ring.len());
                        for address in shard.ring.nodes() {
                            assert!(shard
                                .members
                                .get(&member_id(address))
                                .is_some_and(|m| m.contains_key(address)));
                        }
                    }
                });
            }

            for round in 0..500 {
                let member = &members[round % members.len()];
                membership.apply(put(&ns, member));
                visible_after_put &= membership.contains(ServiceType::Game, &member.address())
                    && membership.resolve(ServiceType::Game, round as i64).is_some();
                if round % 3 == 0 {
                    membership.apply(WatchEvent::Delete {
                        key: ns.member_key(member),
                        prev: None,
                    });
                }
            }
            stop.store(true, std::sync::atomic::Ordering::Relaxed);
        });
        assert!(visible_after_put);
    }

    #[test]
    fn test_colliding_ids_prefer_smaller_address() {
        let mut shard = MemberShard::new(4);
        let a = ClusterMember::new(ServiceType::Db, "10.0.0.1", 1);
        let b = ClusterMember::new(ServiceType::Db, "10.0.0.2", 1);
        // Force both under one id the way a CRC32 collision would
        shard.members.entry(7).or_default().insert(b.address(), b.clone());
        shard.members.entry(7).or_default().insert(a.address(), a.clone());
        assert_eq!(shard.get(7), Some(&a));
    }
}
