//! Consistent hash ring
//!
//! Each member contributes `replicas` virtual points at CRC32 of
//! `address#replica`. A key resolves to the first point at or after its own
//! hash, wrapping to the lowest point. When two addresses land on the same
//! point the lexicographically smaller address owns it; the other address
//! takes over if the owner leaves.

use std::collections::{BTreeMap, BTreeSet};

use hive_types::EntityId;

/// Virtual points per member
pub const DEFAULT_REPLICAS: usize = 64;

#[derive(Debug, Clone)]
pub struct HashRing {
    replicas: usize,
    points: BTreeMap<u32, BTreeSet<String>>,
    nodes: BTreeSet<String>,
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new(DEFAULT_REPLICAS)
    }
}

impl HashRing {
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas: replicas.max(1),
            points: BTreeMap::new(),
            nodes: BTreeSet::new(),
        }
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    pub fn point_hash(address: &str, replica: usize) -> u32 {
        crc32fast::hash(format!("{address}#{replica}").as_bytes())
    }

    pub fn key_hash(key: EntityId) -> u32 {
        crc32fast::hash(&key.to_le_bytes())
    }

    /// Returns false when the address was already present.
    pub fn add(&mut self, address: &str) -> bool {
        if !self.nodes.insert(address.to_string()) {
            return false;
        }
        for replica in 0..self.replicas {
            self.points
                .entry(Self::point_hash(address, replica))
                .or_default()
                .insert(address.to_string());
        }
        true
    }

    /// Returns false when the address was not present.
    pub fn remove(&mut self, address: &str) -> bool {
        if !self.nodes.remove(address) {
            return false;
        }
        for replica in 0..self.replicas {
            let point = Self::point_hash(address, replica);
            if let Some(owners) = self.points.get_mut(&point) {
                owners.remove(address);
                if owners.is_empty() {
                    self.points.remove(&point);
                }
            }
        }
        true
    }

    /// Address owning `key`, or `None` on an empty ring.
    pub fn get(&self, key: EntityId) -> Option<&str> {
        let hash = Self::key_hash(key);
        self.points
            .range(hash..)
            .next()
            .or_else(|| self.points.iter().next())
            .and_then(|(_, owners)| owners.iter().next())
            .map(String::as_str)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.nodes.contains(address)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ring_resolves_nothing() {
        let ring = HashRing::default();
        assert!(ring.get(5).is_none());
    }

    #[test]
    fn test_single_member_owns_everything() {
        let mut ring = HashRing::new(8);
        ring.add("10.0.0.1:1");
        for key in [-3, 0, 1, 99, i64::MAX] {
            assert_eq!(ring.get(key), Some("10.0.0.1:1"));
        }
    }

    #[test]
    fn test_add_remove_restore_assignment() {
        let mut ring = HashRing::default();
        ring.add("a:1");
        ring.add("b:1");
        let before: Vec<_> = (0..200).map(|k| ring.get(k).map(str::to_string)).collect();

        assert!(ring.add("c:1"));
        assert!(!ring.add("c:1"));
        assert!(ring.remove("c:1"));
        assert!(!ring.remove("c:1"));

        let after: Vec<_> = (0..200).map(|k| ring.get(k).map(str::to_string)).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_removed_member_keys_move_only() {
        let mut ring = HashRing::default();
        for addr in ["a:1", "b:1", "c:1"] {
            ring.add(addr);
        }
        let before: Vec<_> = (0..500).map(|k| ring.get(k).unwrap().to_string()).collect();
        ring.remove("b:1");
        for (key, owner) in before.iter().enumerate() {
            let now = ring.get(key as i64).unwrap();
            if owner != "b:1" {
                assert_eq!(now, owner, "key {key} moved without its owner leaving");
            }
        }
    }

    #[test]
    fn test_shared_point_goes_to_smaller_address() {
        let mut ring = HashRing::new(1);
        // Same address twice would be deduplicated, so share a point by hand
        ring.points.entry(7).or_default().insert("b:1".into());
        ring.points.entry(7).or_default().insert("a:1".into());
        assert_eq!(ring.get(123), Some("a:1"));
        ring.points.get_mut(&7).unwrap().remove("a:1");
        assert_eq!(ring.get(123), Some("b:1"));
    }
}
