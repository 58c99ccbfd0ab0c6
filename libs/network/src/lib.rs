//! Cluster Networking
//!
//! Everything between one process's actor registry and the rest of the
//! cluster: the coordination store and message transport abstractions with
//! in-process implementations, membership discovery, consistent-hash and
//! stub-slot routing, stub elections, and the [`ClusterNode`] that delivers
//! envelopes and calls.
//!
//! # Example
//!
//! ```rust,no_run
//! use hive_actors::ActorRegistry;
//! use hive_config::ClusterConfig;
//! use hive_network::{ClusterNode, MemoryBus, MemoryStore};
//! use hive_types::EnvelopeHead;
//! use std::sync::Arc;
//!
//! # async fn run() -> hive_network::Result<()> {
//! let node = ClusterNode::new(
//!     ClusterConfig::default(),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MemoryBus::new()),
//!     Arc::new(ActorRegistry::new()),
//! )?;
//! node.start().await?;
//!
//! let head = EnvelopeHead::default().with_id(42);
//! node.send(head, "game<-Player.Login", ("alice".to_string(),)).await?;
//! node.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod discovery;
pub mod election;
pub mod error;
pub mod routing;
pub mod shutdown;
pub mod store;
pub mod transports;

pub use cluster::{reply_envelope, ClusterNode, ON_STUB_REGISTER, ON_STUB_UNREGISTER};
pub use discovery::{
    AttachedRecords, LeaseHandle, Membership, ServiceRegistration, WatchSink, WorkerIdLease,
};
pub use election::{ElectionState, StubElection, StubListener, StubRole, StubSlotMap};
pub use error::{ClusterError, Result};
pub use routing::{HashRing, Location, LocationCache, Namespace};
pub use shutdown::{shutdown_channel, ShutdownSignal};
pub use store::{CoordinationStore, KeyValue, LeaseId, MemoryStore, WatchEvent, WatchStream};
pub use transports::{
    InboundMessage, MemoryBus, MessageHandler, MessageTransport, SubscriptionId,
};
