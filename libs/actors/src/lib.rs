//! Actor Runtime
//!
//! Single-threaded-per-actor execution for Hive processes. Every actor owns a
//! FIFO mailbox drained by one tokio task; handlers and timer callbacks for one
//! actor never run concurrently.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               ActorRegistry                  │
//! │  name → Singleton | Stub | Pool | Virtual    │
//! └───────┬──────────────────────────────────────┘
//!         │ send(envelope): actor + method checked first
//!         ▼
//! ┌───────────────┐  wake (CAS flag)  ┌──────────────────────┐
//! │   Mailbox     │──────────────────▶│  Worker task         │
//! │ Envelope/Timer│                   │  drain → dispatch    │
//! └───────────────┘                   │  table[method](args) │
//!                                     └──────────┬───────────┘
//!                                                │ reply subject set
//!                                                ▼
//!                                           ReplySink
//! ```
//!
//! # Examples
//!
//! ```rust
//! use hive_actors::{Actor, ActorContext, ActorRegistry, DispatchTable};
//! use hive_types::EnvelopeHead;
//!
//! struct Greeter;
//!
//! impl Actor for Greeter {
//!     fn dispatch_table() -> DispatchTable<Self> {
//!         DispatchTable::new().method("Hello", |_: &mut Greeter, _: &mut ActorContext<Greeter>, (name,): (String,)| {
//!             tracing::info!(%name, "hello");
//!         })
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let registry = ActorRegistry::new();
//! registry.register_singleton(Greeter).unwrap();
//! registry
//!     .send_msg(EnvelopeHead::to_actor("Greeter"), "Hello", ("world".to_string(),))
//!     .unwrap();
//! registry.shutdown().await;
//! # });
//! ```

pub mod actor;
pub mod dispatch;
pub mod error;
mod mailbox;
pub mod metrics;
pub mod pool;
pub mod registry;
pub mod reply;
pub mod timer;
mod worker;

pub use actor::{
    assign_actor_id, short_type_name, Actor, ActorContext, ActorKind, ActorRef, ActorState,
    STOP_TICK,
};
pub use dispatch::DispatchTable;
pub use error::{ActorError, Result};
pub use metrics::{ActorMetrics, ActorStats};
pub use pool::{shard_index, ActorPool, VirtualPool};
pub use registry::{ActorRegistry, PacketHandler, Placement};
pub use reply::{ReplyBinding, ReplySink};
pub use timer::{TimerHandle, TimerMode};
