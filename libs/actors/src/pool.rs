//! Pool and virtual placements
//!
//! A fixed pool shards point sends over N identical instances by Euclidean
//! remainder of the routing key. A virtual pool holds instances keyed by
//! entity id, added and removed by the session layer as entities log in and
//! out.

use hive_types::{Envelope, EntityId, SendMode};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::actor::{Actor, ActorKind, ActorRef};
use crate::error::{ActorError, Result};
use crate::reply::ReplyBinding;

/// Shard index for `key` over `size` instances.
pub fn shard_index(key: EntityId, size: usize) -> usize {
    key.rem_euclid(size as i64) as usize
}

/// Fixed-size replicated placement. Never resized after creation.
#[derive(Debug)]
pub struct ActorPool {
    name: String,
    members: Vec<ActorRef>,
}

impl ActorPool {
    pub(crate) fn new(name: String, members: Vec<ActorRef>) -> Self {
        Self { name, members }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn members(&self) -> &[ActorRef] {
        &self.members
    }

    /// Instance a point send with this key lands on.
    pub fn shard(&self, key: EntityId) -> &ActorRef {
        &self.members[shard_index(key, self.members.len())]
    }

    pub fn route(&self, envelope: Envelope) -> Result<()> {
        match envelope.head.send_mode {
            SendMode::Point => self.shard(envelope.head.id).send(envelope),
            SendMode::Broadcast | SendMode::Topic => {
                for member in &self.members {
                    if let Err(e) = member.send(envelope.clone()) {
                        warn!(actor = %self.name, actor_id = member.id(), error = %e, "Fan-out skipped pool member");
                    }
                }
                Ok(())
            }
        }
    }

    pub(crate) fn start(&self) {
        for member in &self.members {
            member.start();
        }
    }

    pub async fn shutdown(&self) {
        let stops = self.members.iter().map(|m| m.stop_and_wait());
        futures::future::join_all(stops).await;
    }
}

/// Dynamically populated placement keyed by entity id.
#[derive(Debug)]
pub struct VirtualPool {
    name: String,
    methods: HashSet<String>,
    instances: RwLock<HashMap<EntityId, ActorRef>>,
    reply: ReplyBinding,
}

impl VirtualPool {
    pub(crate) fn new(name: String, methods: HashSet<String>, reply: ReplyBinding) -> Self {
        Self {
            name,
            methods,
            instances: RwLock::new(HashMap::new()),
            reply,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Placeholder method set, answered without any live instance.
    pub fn has_method(&self, method: &str) -> bool {
        self.methods.contains(method)
    }

    /// Create, start and insert an instance for `id`.
    pub fn spawn<A: Actor>(&self, id: EntityId, actor: A) -> Result<ActorRef> {
        let actor_ref = ActorRef::build(actor, ActorKind::Virtual, Some(id), self.reply.clone());
        if actor_ref.name() != self.name {
            return Err(ActorError::invalid_pool(
                self.name.as_str(),
                format!("cannot hold instances of '{}'", actor_ref.name()),
            ));
        }
        self.insert(actor_ref.clone())?;
        actor_ref.start();
        Ok(actor_ref)
    }

    /// Insert an instance built elsewhere; keyed by its actor id.
    pub fn insert(&self, actor_ref: ActorRef) -> Result<()> {
        let id = actor_ref.id();
        if id == 0 {
            return Err(ActorError::invalid_pool(
                self.name.as_str(),
                "entity id 0 is reserved",
            ));
        }

        let mut instances = self.instances.write();
        if instances.contains_key(&id) {
            return Err(ActorError::DuplicateName {
                name: format!("{}#{}", self.name, id),
            });
        }
        instances.insert(id, actor_ref);
        debug!(actor = %self.name, entity_id = id, "Virtual instance added");
        Ok(())
    }

    /// Remove the instance for `id` and stop it.
    pub fn remove(&self, id: EntityId) -> Option<ActorRef> {
        let removed = self.instances.write().remove(&id);
        if let Some(actor_ref) = &removed {
            actor_ref.stop();
            debug!(actor = %self.name, entity_id = id, "Virtual instance removed");
        }
        removed
    }

    pub fn get(&self, id: EntityId) -> Option<ActorRef> {
        self.instances.read().get(&id).cloned()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.instances.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.instances.read().keys().copied().collect()
    }

    /// Point sends to an absent or zero id are dropped, not failed.
    pub fn route(&self, envelope: Envelope) -> Result<()> {
        match envelope.head.send_mode {
            SendMode::Point => {
                let id = envelope.head.id;
                if id == 0 {
                    debug!(actor = %self.name, method = %envelope.method, "Point send without entity id dropped");
                    return Ok(());
                }
                match self.get(id) {
                    Some(instance) => instance.send(envelope),
                    None => {
                        debug!(
                            actor = %self.name,
                            entity_id = id,
                            method = %envelope.method,
                            "No virtual instance for entity, dropped"
                        );
                        Ok(())
                    }
                }
            }
            SendMode::Broadcast | SendMode::Topic => {
                let targets: Vec<ActorRef> = self.instances.read().values().cloned().collect();
                for target in targets {
                    if let Err(e) = target.send(envelope.clone()) {
                        warn!(actor = %self.name, entity_id = target.id(), error = %e, "Fan-out skipped instance");
                    }
                }
                Ok(())
            }
        }
    }

    pub async fn shutdown(&self) {
        let targets: Vec<ActorRef> = self.instances.write().drain().map(|(_, a)| a).collect();
        info!(actor = %self.name, instances = targets.len(), "Stopping virtual instances");
        let stops = targets.iter().map(|a| a.stop_and_wait());
        futures::future::join_all(stops).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_index_is_euclidean() {
        assert_eq!(shard_index(17, 4), 1);
        assert_eq!(shard_index(-1, 4), 3);
        assert_eq!(shard_index(0, 4), 0);
        assert_eq!(shard_index(i64::MIN, 3), (i64::MIN.rem_euclid(3)) as usize);
    }
}
