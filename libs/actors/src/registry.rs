//! Actor Registry
//!
//! Name → placement map for one process. Every envelope addressed to a local
//! actor passes through [`ActorRegistry::send`], which checks that the actor
//! and the method exist before anything is enqueued.

use hive_types::{Envelope, EnvelopeHead, IntoArgs};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::actor::{Actor, ActorKind, ActorRef};
use crate::error::{ActorError, Result};
use crate::pool::{ActorPool, VirtualPool};
use crate::reply::{ReplyBinding, ReplySink};

/// Consumer of decoded inbound envelopes.
pub trait PacketHandler: Send + Sync + 'static {
    /// Returns true when the envelope was consumed.
    fn handle_envelope(&self, envelope: &Envelope) -> bool;
}

/// Where envelopes for one actor name go.
#[derive(Debug, Clone)]
pub enum Placement {
    Singleton(ActorRef),
    Stub(ActorRef),
    Pool(Arc<ActorPool>),
    Virtual(Arc<VirtualPool>),
}

impl Placement {
    pub fn kind(&self) -> ActorKind {
        match self {
            Placement::Singleton(_) => ActorKind::Singleton,
            Placement::Stub(_) => ActorKind::Stub,
            Placement::Pool(_) => ActorKind::Pool,
            Placement::Virtual(_) => ActorKind::Virtual,
        }
    }

    pub fn has_method(&self, method: &str) -> bool {
        match self {
            Placement::Singleton(actor) | Placement::Stub(actor) => actor.has_method(method),
            Placement::Pool(pool) => pool.members().iter().any(|m| m.has_method(method)),
            Placement::Virtual(pool) => pool.has_method(method),
        }
    }

    fn route(&self, envelope: Envelope) -> Result<()> {
        match self {
            Placement::Singleton(actor) | Placement::Stub(actor) => actor.send(envelope),
            Placement::Pool(pool) => pool.route(envelope),
            Placement::Virtual(pool) => pool.route(envelope),
        }
    }

    async fn shutdown(&self) {
        match self {
            Placement::Singleton(actor) | Placement::Stub(actor) => actor.stop_and_wait().await,
            Placement::Pool(pool) => pool.shutdown().await,
            Placement::Virtual(pool) => pool.shutdown().await,
        }
    }
}

/// Actor registry for one process
#[derive(Debug, Default)]
pub struct ActorRegistry {
    placements: RwLock<HashMap<String, Placement>>,
    reply: ReplyBinding,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route call results of every actor, current and future, to `sink`.
    pub fn bind_reply_sink(&self, sink: Arc<dyn ReplySink>) {
        self.reply.bind(sink);
    }

    pub fn reply_binding(&self) -> ReplyBinding {
        self.reply.clone()
    }

    fn claim(&self, name: &str, placement: Placement) -> Result<()> {
        let mut placements = self.placements.write();
        if placements.contains_key(name) {
            let err = ActorError::DuplicateName {
                name: name.to_string(),
            };
            error!(actor = %name, error = %err, "Registration halted");
            return Err(err);
        }
        info!(actor = %name, kind = ?placement.kind(), "Actor registered");
        placements.insert(name.to_string(), placement);
        Ok(())
    }

    fn reserve(&self, name: &str) -> Result<()> {
        if self.placements.read().contains_key(name) {
            let err = ActorError::DuplicateName {
                name: name.to_string(),
            };
            error!(actor = %name, error = %err, "Registration halted");
            return Err(err);
        }
        Ok(())
    }

    /// Register and start a single instance.
    pub fn register_singleton<A: Actor>(&self, actor: A) -> Result<ActorRef> {
        let actor_ref = ActorRef::build(actor, ActorKind::Singleton, None, self.reply.clone());
        self.claim(actor_ref.name(), Placement::Singleton(actor_ref.clone()))?;
        actor_ref.start();
        Ok(actor_ref)
    }

    /// Register and start a capacity-limited role instance.
    pub fn register_stub<A: Actor>(&self, actor: A) -> Result<ActorRef> {
        let actor_ref = ActorRef::build(actor, ActorKind::Stub, None, self.reply.clone());
        self.claim(actor_ref.name(), Placement::Stub(actor_ref.clone()))?;
        actor_ref.start();
        Ok(actor_ref)
    }

    /// Register and start `size` instances built by `factory(shard)`.
    pub fn register_pool<A, F>(&self, size: usize, mut factory: F) -> Result<Arc<ActorPool>>
    where
        A: Actor,
        F: FnMut(usize) -> A,
    {
        let name = A::actor_name();
        if size == 0 {
            return Err(ActorError::invalid_pool(name, "pool size must be positive"));
        }
        self.reserve(&name)?;

        let members = (0..size)
            .map(|shard| ActorRef::build(factory(shard), ActorKind::Pool, None, self.reply.clone()))
            .collect();
        let pool = Arc::new(ActorPool::new(name.clone(), members));
        self.claim(&name, Placement::Pool(Arc::clone(&pool)))?;
        pool.start();
        Ok(pool)
    }

    /// Register an empty virtual pool for actor type `A`.
    pub fn register_virtual<A: Actor>(&self) -> Result<Arc<VirtualPool>> {
        let name = A::actor_name();
        let methods = A::dispatch_table().method_names();
        let pool = Arc::new(VirtualPool::new(name.clone(), methods, self.reply.clone()));
        self.claim(&name, Placement::Virtual(Arc::clone(&pool)))?;
        Ok(pool)
    }

    pub fn placement(&self, name: &str) -> Option<Placement> {
        self.placements.read().get(name).cloned()
    }

    /// Singleton or stub instance by name.
    pub fn get(&self, name: &str) -> Option<ActorRef> {
        match self.placement(name)? {
            Placement::Singleton(actor) | Placement::Stub(actor) => Some(actor),
            _ => None,
        }
    }

    pub fn pool(&self, name: &str) -> Option<Arc<ActorPool>> {
        match self.placement(name)? {
            Placement::Pool(pool) => Some(pool),
            _ => None,
        }
    }

    pub fn virtual_pool(&self, name: &str) -> Option<Arc<VirtualPool>> {
        match self.placement(name)? {
            Placement::Virtual(pool) => Some(pool),
            _ => None,
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.placements.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn kind_of(&self, name: &str) -> Option<ActorKind> {
        self.placements.read().get(name).map(Placement::kind)
    }

    pub fn has_method(&self, name: &str, method: &str) -> bool {
        self.placements
            .read()
            .get(name)
            .is_some_and(|p| p.has_method(method))
    }

    /// Deliver an envelope to the local placement named in its head.
    pub fn send(&self, envelope: Envelope) -> Result<()> {
        let result = self.route(envelope);
        if let Err(e) = &result {
            if e.is_structural() {
                warn!(error = %e, "Structural error, envelope dropped");
            }
        }
        result
    }

    fn route(&self, envelope: Envelope) -> Result<()> {
        let placement = self
            .placement(&envelope.head.actor_name)
            .ok_or_else(|| ActorError::unknown_actor(envelope.head.actor_name.as_str()))?;
        if !placement.has_method(&envelope.method) {
            return Err(ActorError::unknown_method(
                envelope.head.actor_name.as_str(),
                envelope.method.as_str(),
            ));
        }
        placement.route(envelope)
    }

    pub fn send_msg(
        &self,
        head: EnvelopeHead,
        method: &str,
        args: impl IntoArgs,
    ) -> Result<()> {
        self.send(Envelope::new(head, method, args.into_args()))
    }

    /// Stop every actor and wait for teardown. Placements stay registered.
    pub async fn shutdown(&self) {
        let placements: Vec<Placement> = self.placements.read().values().cloned().collect();
        info!(placements = placements.len(), "Shutting down actor registry");
        futures::future::join_all(placements.iter().map(Placement::shutdown)).await;
        debug!("Actor registry shutdown complete");
    }
}

impl PacketHandler for ActorRegistry {
    fn handle_envelope(&self, envelope: &Envelope) -> bool {
        if !self.placements.read().contains_key(&envelope.head.actor_name) {
            return false;
        }
        // Known actor: consumed even when the method is unknown
        if let Err(e) = self.send(envelope.clone()) {
            if envelope.head.is_call() {
                if let Some(sink) = self.reply.get() {
                    sink.reply(&envelope.head, Err(e.to_string()));
                }
            }
        }
        true
    }
}
