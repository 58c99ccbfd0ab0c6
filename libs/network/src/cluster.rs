//! Cluster Node
//!
//! Binds one process's actor registry to the rest of the cluster: outbound
//! envelopes are resolved to a channel and published, inbound ones are
//! decoded and handed to the packet-handler chain, and call results travel
//! back on the requester's reply subject.
//!
//! ## Point resolution
//!
//! A point envelope without an explicit cluster id resolves in this order:
//!
//! 1. entity location cache (`{ns}/location/{id}`), same service only
//! 2. stub slot `id mod target` when the actor is a configured stub role
//! 3. consistent-hash ring of the destination service
//!
//! An unresolved point envelope is still published to cluster id 0, where
//! nobody listens; a call then fails with a timeout.

use hive_actors::{ActorRegistry, PacketHandler, ReplySink};
use hive_codec::{BincodeCodec, CodecError, EnvelopeCodec};
use hive_config::{defaults, ClusterConfig};
use hive_types::{
    Arg, ClusterId, ClusterMember, EntityId, Envelope, EnvelopeHead, FromArgs, IntoArgs,
    SendMode, ServiceType, StubSlot,
};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::discovery::{
    start_watch, AttachedRecords, LeaseHandle, Membership, ServiceRegistration, WatchSink,
    WorkerIdLease,
};
use crate::election::{StubElection, StubListener, StubRole, StubSlotMap};
use crate::routing::{Location, LocationCache, Namespace};
use crate::shutdown::{shutdown_channel, ShutdownSignal};
use crate::store::CoordinationStore;
use crate::transports::{InboundMessage, MessageHandler, MessageTransport, SubscriptionId};
use crate::{ClusterError, Result};

/// Method invoked on a stub role actor when a process gains a slot
pub const ON_STUB_REGISTER: &str = "OnStubRegister";

/// Method invoked on a stub role actor when a process loses a slot
pub const ON_STUB_UNREGISTER: &str = "OnStubUnregister";

pub struct ClusterNode {
    config: ClusterConfig,
    member: ClusterMember,
    cluster_id: ClusterId,
    namespace: Namespace,
    store: Arc<dyn CoordinationStore>,
    transport: Arc<dyn MessageTransport>,
    codec: Arc<dyn EnvelopeCodec>,
    registry: Arc<ActorRegistry>,
    membership: Arc<Membership>,
    locations: Arc<LocationCache>,
    stub_slots: Arc<StubSlotMap>,
    handlers: RwLock<Vec<Arc<dyn PacketHandler>>>,
    replies: Arc<ReplyPublisher>,
    registration: Mutex<Option<ServiceRegistration>>,
    service_lease: LeaseHandle,
    bound_entities: AttachedRecords,
    worker_lease: Mutex<Option<WorkerIdLease>>,
    worker_id: Arc<AtomicI64>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: ShutdownSignal,
    started: AtomicBool,
}

impl std::fmt::Debug for ClusterNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterNode")
            .field("member", &self.member)
            .field("cluster_id", &self.cluster_id)
            .field("namespace", &self.namespace)
            .field("started", &self.is_started())
            .finish()
    }
}

impl ClusterNode {
    pub fn new(
        config: ClusterConfig,
        store: Arc<dyn CoordinationStore>,
        transport: Arc<dyn MessageTransport>,
        registry: Arc<ActorRegistry>,
    ) -> Result<Arc<Self>> {
        Self::with_codec(config, store, transport, registry, Arc::new(BincodeCodec::default()))
    }

    pub fn with_codec(
        config: ClusterConfig,
        store: Arc<dyn CoordinationStore>,
        transport: Arc<dyn MessageTransport>,
        registry: Arc<ActorRegistry>,
        codec: Arc<dyn EnvelopeCodec>,
    ) -> Result<Arc<Self>> {
        config
            .validate()
            .map_err(|e| ClusterError::configuration(e.to_string(), None))?;

        let namespace = Namespace::new(config.namespace.clone());
        let member = config.member();
        let cluster_id = member.id();
        let service_ttl = Duration::from_secs(config.service_ttl_secs.unsigned_abs());

        let registration =
            ServiceRegistration::new(store.clone(), &namespace, &member, service_ttl)?;
        let service_lease = registration.lease_handle();
        let bound_entities = registration.attached();
        let worker_lease = WorkerIdLease::new(store.clone(), namespace.clone(), service_ttl);
        let worker_id = worker_lease.watcher();

        let replies = Arc::new(ReplyPublisher {
            transport: transport.clone(),
            codec: codec.clone(),
        });
        let (shutdown_tx, shutdown_rx) = shutdown_channel();

        Ok(Arc::new(Self {
            membership: Arc::new(Membership::new(namespace.clone())),
            locations: Arc::new(LocationCache::new(namespace.clone())),
            stub_slots: Arc::new(StubSlotMap::new(namespace.clone())),
            handlers: RwLock::new(vec![registry.clone() as Arc<dyn PacketHandler>]),
            registration: Mutex::new(Some(registration)),
            worker_lease: Mutex::new(Some(worker_lease)),
            subscriptions: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            config,
            member,
            cluster_id,
            namespace,
            store,
            transport,
            codec,
            registry,
            replies,
            service_lease,
            bound_entities,
            worker_id,
            shutdown_tx,
            shutdown_rx,
        }))
    }

    /// Join the cluster.
    ///
    /// Failures reaching the store or transport here are returned; once
    /// started, store outages only make the node's view stale.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(
            service = %self.member.service,
            address = %self.member.address(),
            cluster_id = self.cluster_id,
            namespace = %self.namespace.root(),
            "Starting cluster node"
        );

        self.registry.bind_reply_sink(self.replies.clone());

        let retry = Duration::from_millis(defaults::cluster::WATCH_RETRY_MS);
        let watches: [(String, Arc<dyn WatchSink>); 3] = [
            (self.namespace.members_prefix(), self.membership.clone()),
            (self.namespace.location_prefix(), self.locations.clone()),
            (self.namespace.stub_prefix(), self.stub_slots.clone()),
        ];
        for (prefix, sink) in watches {
            let task = start_watch(self.store.clone(), prefix, sink, retry, self.shutdown_signal()).await?;
            self.tasks.lock().push(task);
        }

        self.subscribe_inbound().await?;

        let registration = self.registration.lock().take();
        if let Some(registration) = registration {
            registration.register().await?;
            let task = registration.spawn(self.shutdown_signal());
            self.tasks.lock().push(task);
        }

        let worker_lease = self.worker_lease.lock().take();
        if let Some(worker_lease) = worker_lease {
            worker_lease.claim().await?;
            let task = worker_lease.spawn(self.shutdown_signal());
            self.tasks.lock().push(task);
        }

        self.start_elections()?;

        info!(cluster_id = self.cluster_id, "Cluster node started");
        Ok(())
    }

    fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown_rx.clone()
    }

    async fn subscribe_inbound(self: &Arc<Self>) -> Result<()> {
        let service = self.member.service;
        let channels = [
            self.namespace.point_channel(service, self.cluster_id),
            self.namespace.topic_channel(service),
            self.namespace.call_channel(service, self.cluster_id),
        ];
        for channel in channels {
            let node = Arc::downgrade(self);
            let handler: MessageHandler = Arc::new(move |message: InboundMessage| {
                if let Some(node) = node.upgrade() {
                    node.on_inbound(message);
                }
            });
            let id = self.transport.subscribe(&channel, handler).await?;
            debug!(channel = %channel, subscription = id, "Inbound channel subscribed");
            self.subscriptions.lock().push(id);
        }
        Ok(())
    }

    fn start_elections(self: &Arc<Self>) -> Result<()> {
        let ttl = Duration::from_secs(self.config.stub.ttl_secs.unsigned_abs());
        for role in &self.config.stub.roles {
            let target = self.config.stub_target(role).ok_or_else(|| {
                ClusterError::configuration(format!("stub role '{role}' has no target"), Some("stub.counts"))
            })?;
            let listener = Arc::new(StubAnnouncer {
                node: Arc::downgrade(self),
                service: self.config.stub_service(role),
            });
            let election = StubElection::new(
                StubRole {
                    name: role.clone(),
                    target,
                    ttl,
                },
                self.cluster_id,
                self.namespace.clone(),
                self.store.clone(),
                self.stub_slots.clone(),
                listener,
            );
            info!(role = %role, target, "Stub election started");
            let task = election.spawn(self.config.stub_poll_interval(), self.shutdown_signal());
            self.tasks.lock().push(task);
        }
        Ok(())
    }

    /// Leave the cluster: stop inbound delivery, stop every local actor, then
    /// release slots, the worker id and the service registration.
    pub async fn shutdown(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(cluster_id = self.cluster_id, "Cluster node shutting down");

        let subscriptions: Vec<SubscriptionId> = self.subscriptions.lock().drain(..).collect();
        for id in subscriptions {
            if let Err(e) = self.transport.unsubscribe(id).await {
                warn!(subscription = id, error = %e, "Unsubscribe failed");
            }
        }

        self.registry.shutdown().await;

        self.shutdown_tx.send_replace(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                error!(error = %e, "Background task ended abnormally");
            }
        }
        info!(cluster_id = self.cluster_id, "Cluster node stopped");
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    /// This process's own member record.
    pub fn local_member(&self) -> &ClusterMember {
        &self.member
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ActorRegistry> {
        &self.registry
    }

    pub fn membership(&self) -> &Arc<Membership> {
        &self.membership
    }

    pub fn locations(&self) -> &Arc<LocationCache> {
        &self.locations
    }

    pub fn stub_slots(&self) -> &Arc<StubSlotMap> {
        &self.stub_slots
    }

    /// Worker id claimed at startup, while its lease is held.
    pub fn worker_id(&self) -> Option<i64> {
        match self.worker_id.load(Ordering::SeqCst) {
            id if id < 0 => None,
            id => Some(id),
        }
    }

    /// Append a handler tried after the registry for inbound envelopes.
    pub fn bind_packet_handler(&self, handler: Arc<dyn PacketHandler>) {
        self.handlers.write().push(handler);
    }

    pub fn members(&self, service: ServiceType) -> Vec<ClusterMember> {
        self.membership.members(service)
    }

    /// Concrete member a point envelope with this head would reach.
    pub fn member(&self, head: &EnvelopeHead) -> Option<ClusterMember> {
        let service = head.service.unwrap_or(self.member.service);
        let mut head = head.clone();
        if !self.resolve_point(service, &mut head) {
            return None;
        }
        self.membership.get(service, head.cluster_id)
    }

    /// Resolve `head` through the ring, choosing a random affinity key when
    /// the head has no entity id. The key stays on the head, so resolving it
    /// again picks the same member. Overlays the member's socket id.
    pub fn random_cluster(&self, head: &mut EnvelopeHead) -> Option<ClusterMember> {
        let service = head.service.unwrap_or(self.member.service);
        if head.id == 0 {
            head.id = rand::thread_rng().gen_range(1..=u32::MAX) as EntityId;
        }
        let member = self.membership.resolve(service, head.id)?;
        head.cluster_id = member.id();
        head.socket_id = member.socket_id;
        Some(member)
    }

    /// True once every slot of `role` is observed held.
    pub fn is_enough_stub(&self, role: &str) -> bool {
        self.config
            .stub_target(role)
            .is_some_and(|target| self.stub_slots.count(role) >= target)
    }

    fn resolve_point(&self, service: ServiceType, head: &mut EnvelopeHead) -> bool {
        if head.cluster_id != 0 {
            return true;
        }

        if head.id != 0 {
            if let Some(cluster_id) = self.locations.lookup(service, head.id) {
                head.cluster_id = cluster_id;
                return true;
            }
        }

        if let Some(target) = self.config.stub_target(&head.actor_name) {
            let index = head.id.rem_euclid(target);
            return match self.stub_slots.get(&head.actor_name, index) {
                Some(slot) => {
                    head.cluster_id = slot.cluster_id;
                    true
                }
                None => {
                    warn!(role = %head.actor_name, slot = index, "No holder for stub slot");
                    false
                }
            };
        }

        if self.random_cluster(head).is_some() {
            return true;
        }
        warn!(service = %service, actor = %head.actor_name, "No cluster member to route to");
        false
    }

    fn outbound(&self, head: &mut EnvelopeHead) {
        head.src_cluster_id = self.cluster_id;
        head.reply.clear();
    }

    /// Fire-and-forget delivery.
    ///
    /// A head without a service goes to the local registry; otherwise the
    /// envelope is published on the destination's point or topic channel.
    pub async fn send(
        &self,
        mut head: EnvelopeHead,
        method: &str,
        args: impl IntoArgs,
    ) -> Result<()> {
        let method = head.route(method)?;
        let args = args.into_args();

        let Some(service) = head.service else {
            return Ok(self.registry.send(Envelope::new(head, method, args))?);
        };

        self.outbound(&mut head);
        let channel = match head.send_mode {
            SendMode::Point => {
                self.resolve_point(service, &mut head);
                self.namespace.point_channel(service, head.cluster_id)
            }
            SendMode::Broadcast | SendMode::Topic => self.namespace.topic_channel(service),
        };

        let payload = self.codec.encode(&Envelope::new(head, method, args))?;
        self.transport.publish(&channel, payload).await
    }

    /// Synchronous call: point delivery, one reply, bounded by the configured
    /// call timeout. Failures are returned, never retried.
    pub async fn call(
        &self,
        mut head: EnvelopeHead,
        method: &str,
        args: impl IntoArgs,
    ) -> Result<Vec<Arg>> {
        let method = head.route(method)?;
        let args = args.into_args();
        if !head.send_mode.is_point() {
            return Err(ClusterError::structural(format!(
                "call to {}.{} must use point delivery, got {:?}",
                head.actor_name, method, head.send_mode
            )));
        }

        let service = *head.service.get_or_insert(self.member.service);
        self.outbound(&mut head);
        self.resolve_point(service, &mut head);

        let channel = self.namespace.call_channel(service, head.cluster_id);
        let label = format!("{}.{}", head.actor_name, method);
        let payload = self.codec.encode(&Envelope::new(head, method, args))?;

        let reply = self
            .transport
            .request(&channel, payload, self.config.call_timeout())
            .await
            .map_err(|e| {
                debug!(call = %label, channel = %channel, error = %e, "Call failed");
                e
            })?;
        let reply = self.codec.decode(&reply)?;
        parse_reply(&label, reply.args)
    }

    /// [`call`](Self::call) with the results decoded into `R`.
    pub async fn call_as<R: FromArgs>(
        &self,
        head: EnvelopeHead,
        method: &str,
        args: impl IntoArgs,
    ) -> Result<R> {
        let values = self.call(head, method, args).await?;
        R::from_args(values).map_err(|e| ClusterError::structural(format!("reply of {method}: {e}")))
    }

    /// Publish this node as the location of entity `id`. The record lives
    /// under the service lease; a re-registration after lease loss writes it
    /// again until the entity is unbound.
    pub async fn bind_entity(&self, id: EntityId) -> Result<()> {
        let lease = self
            .service_lease
            .get()
            .ok_or_else(|| ClusterError::coordination("node is not registered"))?;
        let location = Location {
            service: self.member.service,
            cluster_id: self.cluster_id,
        };
        let record = serde_json::to_vec(&location)
            .map_err(|e| ClusterError::coordination(format!("location record: {e}")))?;
        let key = self.namespace.location_key(id);
        self.bound_entities.attach(key.clone(), record.clone());
        if let Err(e) = self.store.put(&key, record, Some(lease)).await {
            self.bound_entities.detach(&key);
            return Err(e);
        }
        self.locations.insert(id, location);
        debug!(entity_id = id, cluster_id = self.cluster_id, "Entity bound");
        Ok(())
    }

    pub async fn unbind_entity(&self, id: EntityId) -> Result<()> {
        let key = self.namespace.location_key(id);
        self.bound_entities.detach(&key);
        self.store.delete(&key).await?;
        self.locations.remove(id);
        debug!(entity_id = id, "Entity unbound");
        Ok(())
    }

    fn on_inbound(&self, message: InboundMessage) {
        let mut envelope = match self.codec.decode(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(channel = %message.channel, error = %e, "Undecodable envelope dropped");
                return;
            }
        };
        if let Some(reply) = message.reply {
            envelope.head.reply = reply;
        }

        let handlers = self.handlers.read().clone();
        if handlers.iter().any(|handler| handler.handle_envelope(&envelope)) {
            return;
        }

        let head = &envelope.head;
        if head.send_mode.is_point() {
            warn!(actor = %head.actor_name, method = %envelope.method, "No handler for envelope, dropped");
        } else {
            debug!(actor = %head.actor_name, method = %envelope.method, "No local handler for fan-out");
        }
        if head.is_call() {
            self.replies
                .reply(head, Err(format!("unknown actor '{}'", head.actor_name)));
        }
    }
}

fn parse_reply(label: &str, args: Vec<Arg>) -> Result<Vec<Arg>> {
    let mut values = args.into_iter();
    match values.next() {
        Some(Arg::Str(message)) if message.is_empty() => Ok(values.collect()),
        Some(Arg::Str(message)) => Err(ClusterError::Remote {
            method: label.to_string(),
            message,
        }),
        _ => Err(CodecError::decode(0, format!("reply to {label} has no error slot")).into()),
    }
}

/// Reply payload: `[error string, results...]`, addressed back to the origin.
pub fn reply_envelope(head: &EnvelopeHead, result: std::result::Result<Vec<Arg>, String>) -> Envelope {
    let (message, values) = match result {
        Ok(values) => (String::new(), values),
        Err(message) => (message, Vec::new()),
    };
    let mut reply_head = head.clone();
    reply_head.reply.clear();
    reply_head.cluster_id = head.src_cluster_id;

    let mut args = Vec::with_capacity(values.len() + 1);
    args.push(Arg::Str(message));
    args.extend(values);
    Envelope::new(reply_head, "", args)
}

/// Publishes handler results to the requester's reply subject
struct ReplyPublisher {
    transport: Arc<dyn MessageTransport>,
    codec: Arc<dyn EnvelopeCodec>,
}

impl ReplySink for ReplyPublisher {
    fn reply(&self, head: &EnvelopeHead, result: std::result::Result<Vec<Arg>, String>) {
        if head.reply.is_empty() {
            return;
        }
        let subject = head.reply.clone();
        let payload = match self.codec.encode(&reply_envelope(head, result)) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(subject = %subject, error = %e, "Reply not encodable, dropped");
                return;
            }
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(subject = %subject, "No runtime to publish reply on");
            return;
        };
        let transport = self.transport.clone();
        runtime.spawn(async move {
            if let Err(e) = transport.publish(&subject, payload).await {
                warn!(subject = %subject, error = %e, "Reply publish failed");
            }
        });
    }
}

/// Announces slot changes to the role actor on every member of its service
struct StubAnnouncer {
    node: Weak<ClusterNode>,
    service: ServiceType,
}

impl StubAnnouncer {
    fn announce(&self, slot: &StubSlot, method: &'static str) {
        let Some(node) = self.node.upgrade() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let head = EnvelopeHead::to_actor(slot.role.clone())
            .with_service(self.service)
            .topic();
        let args = (slot.index, slot.cluster_id);
        let role = slot.role.clone();
        runtime.spawn(async move {
            if let Err(e) = node.send(head, method, args).await {
                warn!(role = %role, method, error = %e, "Stub announcement failed");
            }
        });
    }
}

impl StubListener for StubAnnouncer {
    fn on_registered(&self, slot: &StubSlot) {
        self.announce(slot, ON_STUB_REGISTER);
    }

    fn on_unregistered(&self, slot: &StubSlot) {
        self.announce(slot, ON_STUB_UNREGISTER);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_envelope_shape() {
        let mut head = EnvelopeHead::to_actor("Foo").with_cluster(5);
        head.src_cluster_id = 9;
        head.reply = "_INBOX.1".into();

        let ok = reply_envelope(&head, Ok(vec![Arg::I32(3)]));
        assert_eq!(ok.head.cluster_id, 9);
        assert!(ok.head.reply.is_empty());
        assert_eq!(ok.args, vec![Arg::Str(String::new()), Arg::I32(3)]);

        let err = reply_envelope(&head, Err("nope".into()));
        assert_eq!(err.args, vec![Arg::Str("nope".into())]);
    }

    #[test]
    fn test_parse_reply() {
        assert_eq!(
            parse_reply("Foo.Sum", vec![Arg::Str(String::new()), Arg::I64(5)]).unwrap(),
            vec![Arg::I64(5)]
        );
        match parse_reply("Foo.Sum", vec![Arg::Str("refused".into())]) {
            Err(ClusterError::Remote { method, message }) => {
                assert_eq!(method, "Foo.Sum");
                assert_eq!(message, "refused");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(parse_reply("Foo.Sum", vec![]).unwrap_err().category(), "codec");
    }
}
